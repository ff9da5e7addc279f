//! Local memory side of the DSM node: the mapped region and its coherence
//! directory.

pub mod directory;
pub mod region;
pub mod space;

pub use directory::{format_states, Directory, PageGuard, PageState};
pub use region::{Region, RegionInfo};
pub use space::SharedSpace;
