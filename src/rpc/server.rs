use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use crate::error::DsmResult;
use crate::rpc::handlers::{self, RpcHandlerContext};
use crate::rpc::helpers::read_frame;
use crate::rpc::protocol::PeerRequest;

/// Inbound half of the peer link
///
/// Accepts exactly one connection (the peer's outbound stream) and serves the
/// requests on it until the stream fails.
pub struct PeerServer {
    listener: TcpListener,
    ctx: Arc<RpcHandlerContext>,
}

impl PeerServer {
    pub fn bind(endpoint: &str, ctx: Arc<RpcHandlerContext>) -> DsmResult<Self> {
        let listener = TcpListener::bind(endpoint)?;
        tracing::info!("Request server listening on {}", listener.local_addr()?);
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> DsmResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the peer and serve it. Only returns on a fatal error.
    pub fn run(self) -> DsmResult<()> {
        let (stream, addr) = self.listener.accept()?;
        stream.set_nodelay(true)?;
        tracing::info!("Peer connected from {}", addr);
        serve(&self.ctx, stream).inspect_err(|e| {
            if e.is_transport() {
                tracing::error!("Lost inbound stream from {}: {}", addr, e);
            }
        })
    }
}

/// Read and dispatch frames forever.
///
/// A frame that does not decode is skipped; a stream error or EOF ends the
/// loop with an error.
pub fn serve<S: Read + Write>(ctx: &RpcHandlerContext, mut stream: S) -> DsmResult<()> {
    loop {
        let bytes = read_frame(&mut stream)?;

        let request = match PeerRequest::decode(&bytes) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Skipping frame: {}", e);
                continue;
            }
        };

        handlers::dispatch(ctx, request, &mut stream)?;
    }
}
