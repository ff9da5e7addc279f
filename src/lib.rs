//! pagedsm - Two-node distributed shared memory over userfaultfd
//!
//! Two peer processes present one shared virtual range. Pages move between
//! them on demand: an access to a non-resident page is intercepted by the
//! kernel, resolved from the local coherence directory and, when needed, the
//! peer's copy, and installed before the accessing thread resumes.
//!
//! # Architecture
//!
//! - **Memory** ([`memory`]): the anonymous mapping backing the range and the
//!   per-page MSI (Invalid/Shared/Modified) coherence directory
//! - **Fault handling** ([`fault`]): the userfaultfd loop and the resolver that
//!   decides what a faulting page receives
//! - **Peer link** ([`rpc`]): fixed-size binary frames over two TCP streams
//!   carrying Create, Invalidate, Fetch and Hello
//! - **Node** ([`node`]): bootstrap (who allocates the region), worker threads
//!   and the read/write API
//!
//! # Example
//!
//! ```rust,no_run
//! use pagedsm::config::DsmConfig;
//! use pagedsm::node::{DsmNode, PageSelection};
//!
//! # fn example() -> pagedsm::error::DsmResult<()> {
//! // Peer runs with the ports swapped
//! let node = DsmNode::create_or_join(DsmConfig::with_ports(9000, 9001), || Ok(4))?;
//!
//! node.write_range(PageSelection::All, b"hello")?;
//! println!("{}", pagedsm::memory::format_states(&node.dump_state()));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod fault;
pub mod logging;
pub mod memory;
pub mod node;
pub mod rpc;
pub mod signal;

pub use error::{DsmError, DsmResult};
pub use node::{DsmNode, NodeRole, PageSelection};
