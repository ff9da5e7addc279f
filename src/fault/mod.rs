//! Page-fault side of the node: intercepting accesses to non-resident pages
//! and resolving them from the directory and the peer.

pub mod handler;
pub mod registration;
pub mod resolver;

pub use handler::FaultHandler;
pub use registration::{userfaultfd_available, FaultRegistration};
pub use resolver::{
    DirectInstaller, FaultKind, FaultResolver, PageContent, PageFault, PageInstaller, PageSource,
};
