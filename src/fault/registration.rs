//! userfaultfd registration of the shared region.
//!
//! Missing-page faults on the region are delivered to the fault loop as
//! events; pages are committed with `UFFDIO_COPY` (fetched content) or
//! `UFFDIO_ZEROPAGE` and the faulting thread is woken in the same ioctl.

use std::borrow::Cow;
use std::os::raw::c_void;
use std::sync::Arc;

use userfaultfd::{Event, ReadWrite, Uffd, UffdBuilder};

use crate::error::{DsmError, DsmResult};
use crate::memory::SharedSpace;

use super::resolver::{FaultKind, PageContent, PageFault, PageInstaller};

/// Whether this process may create a userfaultfd at all.
///
/// Unprivileged use depends on `vm.unprivileged_userfaultfd` and the kernel
/// version, so integration tests check this before starting nodes.
pub fn userfaultfd_available() -> bool {
    build_uffd().is_ok()
}

fn build_uffd() -> Result<Uffd, userfaultfd::Error> {
    UffdBuilder::new()
        .close_on_exec(true)
        .non_blocking(false)
        .user_mode_only(true)
        .create()
}

/// A region registered for missing-page fault interception
pub struct FaultRegistration {
    uffd: Uffd,
    space: Arc<SharedSpace>,
}

impl FaultRegistration {
    /// Register the whole region of `space`
    pub fn register(space: Arc<SharedSpace>) -> DsmResult<Self> {
        let uffd = build_uffd()?;
        uffd.register(
            space.region.base_addr() as *mut c_void,
            space.region.len(),
        )?;

        tracing::info!(
            "Registered {:#x}..{:#x} for fault interception",
            space.region.base_addr(),
            space.region.base_addr() + space.region.len()
        );

        Ok(Self { uffd, space })
    }

    pub fn space(&self) -> &Arc<SharedSpace> {
        &self.space
    }

    /// Block until the next page fault.
    ///
    /// Any event other than a page fault is an error.
    pub fn next_fault(&self) -> DsmResult<PageFault> {
        loop {
            match self.uffd.read_event()? {
                Some(Event::Pagefault { rw, addr, .. }) => {
                    let kind = match rw {
                        ReadWrite::Read => FaultKind::Read,
                        ReadWrite::Write => FaultKind::Write,
                    };
                    return Ok(PageFault {
                        address: addr as usize,
                        kind,
                    });
                }
                Some(other) => return Err(DsmError::UnexpectedEvent(format!("{:?}", other))),
                // Spurious wakeup of the blocking read
                None => continue,
            }
        }
    }

    /// Wake accessors of a page that is already present
    fn wake(&self, dst: *mut c_void, page: usize) -> DsmResult<()> {
        tracing::debug!("Page {} already present, waking accessors", page);
        self.uffd.wake(dst, self.space.page_size())?;
        Ok(())
    }
}

fn is_already_present(err: &userfaultfd::Error) -> bool {
    match err {
        userfaultfd::Error::CopyFailed(errno) | userfaultfd::Error::ZeropageFailed(errno) => {
            *errno as i32 == libc::EEXIST
        }
        _ => false,
    }
}

impl PageInstaller for FaultRegistration {
    fn install(&self, page: usize, content: &PageContent) -> DsmResult<()> {
        let page_size = self.space.page_size();
        let dst = self.space.region.page_ptr(page)? as *mut c_void;

        let result = match content {
            PageContent::Zero => unsafe { self.uffd.zeropage(dst, page_size, true) },
            PageContent::Bytes(data) => {
                let src: Cow<'_, [u8]> = if data.len() == page_size {
                    Cow::Borrowed(data.as_slice())
                } else {
                    let mut padded = vec![0u8; page_size];
                    let n = data.len().min(page_size);
                    padded[..n].copy_from_slice(&data[..n]);
                    Cow::Owned(padded)
                };
                // SAFETY: `src` is a live buffer of `page_size` bytes and
                // `dst` is a page-aligned page inside the registered region.
                unsafe { self.uffd.copy(src.as_ptr() as *const c_void, dst, page_size, true) }
            }
        };

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_already_present(&e) => self.wake(dst, page),
            Err(e) => Err(e.into()),
        }
    }
}
