//! Anonymous memory region backing the shared address range.
//!
//! The region is a single private anonymous mapping. Pages are addressed by
//! index; every accessor here goes through raw pointers because, once the
//! region is registered with userfaultfd, touching a non-resident page suspends
//! the calling thread until the fault loop installs it.

use std::io;
use std::ptr::NonNull;

use crate::error::{DsmError, DsmResult};

/// Geometry of a region as exchanged during bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    /// Base address (a placement hint when sent to the peer)
    pub address: usize,
    /// Total length in bytes
    pub length: usize,
    /// Page size the region is divided into
    pub page_size: usize,
}

impl RegionInfo {
    pub fn num_pages(&self) -> usize {
        self.length / self.page_size
    }
}

/// Region handle.
pub struct Region {
    /// Base pointer to mapped region
    base_ptr: NonNull<u8>,
    /// Total size of the region
    length: usize,
    /// Page size
    page_size: usize,
}

// SAFETY: Region can be sent between threads because:
// - The mapping is process-wide, not thread-specific
// - The pointer is never reassigned after construction
unsafe impl Send for Region {}

// SAFETY: Region can be shared between threads because:
// - Same-page install/evict/state changes are serialized by the directory's page locks
// - Byte copies in and out of a page never alias Rust references
unsafe impl Sync for Region {}

impl Region {
    /// Map a new zero-filled read/write region.
    ///
    /// # Arguments
    /// * `hint` - Preferred base address, or `None` to let the kernel choose.
    ///   The kernel may place the mapping elsewhere; callers address pages by
    ///   index, never by absolute address.
    /// * `length` - Length in bytes, an exact multiple of `page_size`
    /// * `page_size` - Page size, a power of two
    pub fn allocate(hint: Option<usize>, length: usize, page_size: usize) -> DsmResult<Self> {
        Self::validate_geometry(length, page_size)?;

        let hint_ptr = match hint {
            Some(addr) if addr % page_size == 0 => addr as *mut libc::c_void,
            Some(addr) => {
                tracing::warn!("Ignoring unaligned region hint {:#x}", addr);
                std::ptr::null_mut()
            }
            None => std::ptr::null_mut(),
        };

        let ptr = unsafe {
            libc::mmap(
                hint_ptr,
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(DsmError::MmapFailed(io::Error::last_os_error()));
        }

        let base_ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| {
            DsmError::MmapFailed(io::Error::new(
                io::ErrorKind::Other,
                "mmap returned null pointer but not MAP_FAILED",
            ))
        })?;

        if let Some(addr) = hint {
            if addr != base_ptr.as_ptr() as usize {
                tracing::debug!(
                    "Region placed at {:p} instead of hint {:#x}",
                    base_ptr.as_ptr(),
                    addr
                );
            }
        }

        Ok(Self {
            base_ptr,
            length,
            page_size,
        })
    }

    /// Map a region of `num_pages` pages at a kernel-chosen address
    pub fn with_pages(num_pages: usize, page_size: usize) -> DsmResult<Self> {
        let length = num_pages
            .checked_mul(page_size)
            .ok_or_else(|| DsmError::InvalidRegion(format!("{} pages overflow", num_pages)))?;
        Self::allocate(None, length, page_size)
    }

    fn validate_geometry(length: usize, page_size: usize) -> DsmResult<()> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(DsmError::InvalidRegion(format!(
                "page size {} is not a power of two",
                page_size
            )));
        }
        if length == 0 || length % page_size != 0 {
            return Err(DsmError::InvalidRegion(format!(
                "length {} is not a non-zero multiple of page size {}",
                length, page_size
            )));
        }
        Ok(())
    }

    pub fn base_addr(&self) -> usize {
        self.base_ptr.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> usize {
        self.length / self.page_size
    }

    pub fn info(&self) -> RegionInfo {
        RegionInfo {
            address: self.base_addr(),
            length: self.length,
            page_size: self.page_size,
        }
    }

    /// Index of the page containing `addr`
    pub fn page_index_of(&self, addr: usize) -> DsmResult<usize> {
        let base = self.base_addr();
        if addr < base || addr >= base + self.length {
            return Err(DsmError::AddressOutOfRange { addr });
        }
        Ok((addr - base) / self.page_size)
    }

    fn check_page(&self, page: usize) -> DsmResult<()> {
        if page >= self.num_pages() {
            return Err(DsmError::PageOutOfRange {
                page: page as u64,
                num_pages: self.num_pages(),
            });
        }
        Ok(())
    }

    /// Pointer to the first byte of `page`
    pub fn page_ptr(&self, page: usize) -> DsmResult<*mut u8> {
        self.check_page(page)?;
        Ok(unsafe { self.base_ptr.as_ptr().add(page * self.page_size) })
    }

    /// Copy out the contents of `page`.
    ///
    /// If the page is not resident and the region is registered for fault
    /// interception, the calling thread blocks until the page is installed.
    pub fn read_page(&self, page: usize) -> DsmResult<Vec<u8>> {
        let src = self.page_ptr(page)?;
        let mut data = vec![0u8; self.page_size];
        unsafe {
            std::ptr::copy_nonoverlapping(src as *const u8, data.as_mut_ptr(), self.page_size);
        }
        Ok(data)
    }

    /// Overwrite `page` with `data`, zero padding it to a full page.
    ///
    /// At most `page_size` bytes are copied; returns the number copied.
    pub fn write_page(&self, page: usize, data: &[u8]) -> DsmResult<usize> {
        let dst = self.page_ptr(page)?;
        let copy_len = data.len().min(self.page_size);
        unsafe {
            std::ptr::write_bytes(dst, 0, self.page_size);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, copy_len);
        }
        Ok(copy_len)
    }

    /// Drop the physical backing of `page` so that the next access faults.
    ///
    /// The contents are discarded locally; the peer's copy is unaffected.
    pub fn evict_page(&self, page: usize) -> DsmResult<()> {
        let ptr = self.page_ptr(page)?;
        let ret = unsafe {
            libc::madvise(
                ptr as *mut libc::c_void,
                self.page_size,
                libc::MADV_DONTNEED,
            )
        };
        if ret != 0 {
            return Err(DsmError::EvictFailed {
                page,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("base", &self.base_ptr.as_ptr())
            .field("length", &self.length)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base_ptr.as_ptr() as *mut libc::c_void, self.length);
        }
    }
}
