//! The shared space of a node: region plus directory, created together once
//! the region geometry is known.

use crate::error::DsmResult;

use super::directory::Directory;
use super::region::Region;

pub struct SharedSpace {
    pub region: Region,
    pub directory: Directory,
}

impl SharedSpace {
    pub fn new(region: Region) -> Self {
        let directory = Directory::new(region.num_pages());
        Self { region, directory }
    }

    pub fn num_pages(&self) -> usize {
        self.directory.len()
    }

    pub fn page_size(&self) -> usize {
        self.region.page_size()
    }

    /// Convert a wire page index into a local one, rejecting out-of-range
    /// indices.
    pub fn checked_page(&self, page: u64) -> DsmResult<usize> {
        if page >= self.num_pages() as u64 {
            return Err(crate::error::DsmError::PageOutOfRange {
                page,
                num_pages: self.num_pages(),
            });
        }
        Ok(page as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::system_page_size;

    #[test]
    fn test_directory_matches_region() {
        let space = SharedSpace::new(Region::with_pages(3, system_page_size()).unwrap());
        assert_eq!(space.num_pages(), 3);
        assert_eq!(space.directory.snapshot().len(), 3);
        assert_eq!(space.checked_page(2).unwrap(), 2);
        assert!(space.checked_page(3).is_err());
    }
}
