//! Error types for pagedsm.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum DsmError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to map region: {0}")]
    MmapFailed(io::Error),

    #[error("Failed to evict page {page}: {source}")]
    EvictFailed { page: usize, source: io::Error },

    #[error("userfaultfd error: {0}")]
    Userfault(#[from] userfaultfd::Error),

    #[error("Page index {page} out of range (region has {num_pages} pages)")]
    PageOutOfRange { page: u64, num_pages: usize },

    #[error("Address {addr:#x} is outside the shared region")]
    AddressOutOfRange { addr: usize },

    #[error("Invalid region geometry: {0}")]
    InvalidRegion(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unexpected fault event: {0}")]
    UnexpectedEvent(String),

    #[error("Peer disconnected")]
    PeerDisconnected,

    #[error("Page size mismatch: local {local}, peer {peer}")]
    PageSizeMismatch { local: usize, peer: usize },

    #[error("Bootstrap conflict: {0}")]
    BootstrapConflict(String),

    #[error("Worker thread failed: {0}")]
    WorkerFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DsmError {
    /// Whether this error came from the peer stream itself (as opposed to a
    /// single bad frame or a local condition).
    pub fn is_transport(&self) -> bool {
        matches!(self, DsmError::Io(_) | DsmError::PeerDisconnected)
    }
}

pub type DsmResult<T> = Result<T, DsmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(DsmError::PeerDisconnected.is_transport());
        assert!(DsmError::Io(io::Error::from(io::ErrorKind::ConnectionReset)).is_transport());
        assert!(!DsmError::MalformedFrame("kind 9".to_string()).is_transport());
        assert!(!DsmError::WorkerFailed("fault".to_string()).is_transport());
    }

    #[test]
    fn test_display() {
        let err = DsmError::PageOutOfRange {
            page: 7,
            num_pages: 4,
        };
        assert_eq!(
            err.to_string(),
            "Page index 7 out of range (region has 4 pages)"
        );
    }
}
