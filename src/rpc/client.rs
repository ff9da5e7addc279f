use std::io;
use std::net::TcpStream;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::error::DsmResult;
use crate::memory::RegionInfo;
use crate::rpc::helpers::write_request;
use crate::rpc::protocol::{FetchReply, HelloToken, PeerRequest};

/// Outbound half of the peer link
///
/// All requests to the peer go through one stream. Fetch holds the stream for
/// the whole request/reply exchange, so a reply is always read by the caller
/// that sent the matching request.
pub struct PeerClient {
    stream: Mutex<TcpStream>,
    peer: String,
}

impl PeerClient {
    /// Connect to the peer's request server, retrying every `retry_interval`
    /// while it is not listening yet.
    ///
    /// Returns the client and the number of failed attempts before the
    /// connection succeeded.
    pub fn connect(endpoint: &str, retry_interval: Duration) -> DsmResult<(Self, u64)> {
        let mut retries = 0u64;
        let stream = loop {
            match TcpStream::connect(endpoint) {
                Ok(stream) => break stream,
                Err(e) if is_retryable(&e) => {
                    retries += 1;
                    tracing::debug!(
                        "Peer {} not reachable yet (attempt {}): {}",
                        endpoint,
                        retries,
                        e
                    );
                    thread::sleep(retry_interval);
                }
                Err(e) => return Err(e.into()),
            }
        };

        stream.set_nodelay(true)?;
        tracing::info!("Connected to peer {} after {} retries", endpoint, retries);

        Ok((Self::from_stream(stream, endpoint.to_string()), retries))
    }

    pub fn from_stream(stream: TcpStream, peer: String) -> Self {
        Self {
            stream: Mutex::new(stream),
            peer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn lock(&self) -> MutexGuard<'_, TcpStream> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, request: &PeerRequest) -> DsmResult<()> {
        write_request(&mut *self.lock(), request)
    }

    pub fn send_hello(&self, token: HelloToken) -> DsmResult<()> {
        self.send(&PeerRequest::Hello(token))
    }

    /// Announce the region this node allocated
    pub fn send_create(&self, info: RegionInfo) -> DsmResult<()> {
        tracing::info!(
            "Sending Create: address {:#x}, {} bytes, page size {}",
            info.address,
            info.length,
            info.page_size
        );
        self.send(&PeerRequest::Create(info))
    }

    /// Tell the peer to drop its copy of `page`. No acknowledgment is awaited.
    pub fn send_invalidate(&self, page: usize) -> DsmResult<()> {
        tracing::debug!("Sending Invalidate({})", page);
        self.send(&PeerRequest::Invalidate { page: page as u64 })
    }

    /// Request the peer's copy of `page` and block until it answers
    pub fn fetch(&self, page: usize, page_size: usize) -> DsmResult<FetchReply> {
        let mut stream = self.lock();
        tracing::debug!("Sending Fetch({}) to {}", page, self.peer);
        write_request(&mut *stream, &PeerRequest::Fetch { page: page as u64 })?;
        let reply = FetchReply::read_from(&mut *stream, page_size)?;
        tracing::debug!(
            "Fetch({}) reply: {}",
            page,
            match reply {
                FetchReply::Absent => "absent",
                FetchReply::Page(_) => "page",
            }
        );
        Ok(reply)
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::helpers::read_frame;
    use std::net::TcpListener;

    #[test]
    fn test_connect_retries_until_listener_appears() {
        // Reserve a port, release it, and start listening on it later
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let endpoint = format!("127.0.0.1:{}", port);

        let listener_thread = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
            let (mut stream, _) = listener.accept().unwrap();
            read_frame(&mut stream).unwrap()
        });

        let (client, retries) = PeerClient::connect(&endpoint, Duration::from_millis(20)).unwrap();
        assert!(retries > 0);
        client.send_invalidate(3).unwrap();

        let frame = listener_thread.join().unwrap();
        assert_eq!(
            PeerRequest::decode(&frame).unwrap(),
            PeerRequest::Invalidate { page: 3 }
        );
    }
}
