//! Global constants for pagedsm
//!
//! Wire-level constants shared by the peer client and the peer server, and the
//! system page-size query used when sizing the shared region.

/// Size of every request frame on the peer link, in bytes.
///
/// Each request (Create, Invalidate, Fetch, Hello) occupies exactly one frame,
/// so the server never has to search for frame boundaries.
pub const FRAME_SIZE: usize = 32;

/// First byte of a Fetch reply when a full page follows.
pub const FETCH_REPLY_PAGE: u8 = 0x00;

/// First byte of a Fetch reply when the responder holds no data for the page.
/// Nothing follows this byte.
pub const FETCH_REPLY_ABSENT: u8 = 0x01;

/// Default host of the peer's listener
pub const DEFAULT_PEER_HOST: &str = "127.0.0.1";

/// Default address the request server binds to
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0";

/// Thread name of the fault-handling loop
pub const FAULT_THREAD_NAME: &str = "pagedsm-fault";

/// Thread name of the peer request server loop
pub const SERVER_THREAD_NAME: &str = "pagedsm-server";

/// Query the system page size.
///
/// Falls back to 4096 if `sysconf` reports an error, which does not happen on
/// any Linux target this crate supports.
pub fn system_page_size() -> usize {
    use std::sync::OnceLock;

    static CACHE: OnceLock<usize> = OnceLock::new();
    *CACHE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 {
            tracing::warn!("sysconf(_SC_PAGESIZE) failed, assuming 4096");
            4096
        } else {
            size as usize
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let size = system_page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }

    #[test]
    fn test_reply_tags_differ() {
        assert_ne!(FETCH_REPLY_PAGE, FETCH_REPLY_ABSENT);
    }
}
