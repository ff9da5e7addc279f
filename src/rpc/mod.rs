//! Peer link: the two TCP streams between the nodes and the requests on them.
//!
//! Each node runs a [`PeerServer`] on its listen port (one accepted stream,
//! the peer's outbound one) and owns a [`PeerClient`] connected to the peer's
//! listen port. Requests flow only from client to server; the only response is
//! the answer to a Fetch, read back on the same outbound stream.

pub mod client;
pub mod handlers;
pub mod helpers;
pub mod protocol;
pub mod server;

pub use client::PeerClient;
pub use handlers::{BootstrapWaits, RpcHandlerContext};
pub use protocol::{FetchReply, HelloToken, PeerRequest, RequestFrame, RequestKind};
pub use server::PeerServer;
