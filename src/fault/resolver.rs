//! Fault resolution: what a faulting page should contain, and which
//! directory transition goes with it.
//!
//! The resolver is independent of how faults are delivered and how pages are
//! installed. The userfaultfd loop plugs in [`FaultRegistration`] as the
//! installer; tests plug in [`DirectInstaller`].
//!
//! [`FaultRegistration`]: super::registration::FaultRegistration

use std::sync::Arc;

use crate::error::DsmResult;
use crate::memory::{PageState, Region, SharedSpace};
use crate::rpc::{FetchReply, PeerClient};

/// Access that caused a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Read,
    Write,
}

/// One pending fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// Faulting address inside the region
    pub address: usize,
    pub kind: FaultKind,
}

/// Content to install into a faulting page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageContent {
    Zero,
    /// Exactly one page of bytes
    Bytes(Vec<u8>),
}

/// Where read faults on `Invalid` pages get their content
pub trait PageSource {
    fn fetch_page(&self, page: usize, page_size: usize) -> DsmResult<FetchReply>;
}

impl PageSource for PeerClient {
    fn fetch_page(&self, page: usize, page_size: usize) -> DsmResult<FetchReply> {
        self.fetch(page, page_size)
    }
}

/// Commits content as the backing of a page and releases waiting accessors
pub trait PageInstaller {
    fn install(&self, page: usize, content: &PageContent) -> DsmResult<()>;
}

/// Installs pages by plain stores into a region that is not registered for
/// fault interception.
pub struct DirectInstaller<'a> {
    region: &'a Region,
}

impl<'a> DirectInstaller<'a> {
    pub fn new(region: &'a Region) -> Self {
        Self { region }
    }
}

impl PageInstaller for DirectInstaller<'_> {
    fn install(&self, page: usize, content: &PageContent) -> DsmResult<()> {
        match content {
            PageContent::Zero => self.region.write_page(page, &[])?,
            PageContent::Bytes(data) => self.region.write_page(page, data)?,
        };
        Ok(())
    }
}

pub struct FaultResolver<S> {
    space: Arc<SharedSpace>,
    source: Arc<S>,
}

impl<S: PageSource> FaultResolver<S> {
    pub fn new(space: Arc<SharedSpace>, source: Arc<S>) -> Self {
        Self { space, source }
    }

    pub fn space(&self) -> &Arc<SharedSpace> {
        &self.space
    }

    /// Decide the content of `page` for a fault of `kind`, applying the
    /// directory transition that goes with it.
    ///
    /// Write faults always get a zero page and leave the state alone; the
    /// write completion that follows marks the page `Modified`. Read faults
    /// fetch from the peer only when the page is `Invalid`.
    ///
    /// Callers must hold the page lock.
    pub fn resolve(&self, page: usize, kind: FaultKind) -> DsmResult<PageContent> {
        if kind == FaultKind::Write {
            return Ok(PageContent::Zero);
        }

        match self.space.directory.get(page)? {
            PageState::Invalid => {
                let reply = self
                    .source
                    .fetch_page(page, self.space.page_size())?;
                self.space.directory.set(page, PageState::Shared)?;
                Ok(match reply {
                    FetchReply::Absent => PageContent::Zero,
                    FetchReply::Page(data) => PageContent::Bytes(data),
                })
            }
            PageState::Shared | PageState::Modified => Ok(PageContent::Zero),
        }
    }

    /// Resolve one fault and install the result under the page lock.
    ///
    /// A second fault on the same page waits for the first and then resolves
    /// against the state it left; its content reaches a page that is already
    /// present, which the installer must leave alone.
    pub fn handle<I: PageInstaller>(&self, fault: PageFault, installer: &I) -> DsmResult<()> {
        let page = self.space.region.page_index_of(fault.address)?;
        // Held across the peer round trip. See "Known hazard" in DESIGN.md
        // for the cross-node wait this can form.
        let _guard = self.space.directory.lock_page(page)?;

        let content = self.resolve(page, fault.kind)?;
        tracing::debug!(
            "{:?} fault at {:#x} (page {}): installing {}",
            fault.kind,
            fault.address,
            page,
            match content {
                PageContent::Zero => "zero page",
                PageContent::Bytes(_) => "fetched page",
            }
        );
        installer.install(page, &content)
    }

    /// Bring an `Invalid` page in as a read fault would, for regions that
    /// are not registered for fault interception.
    ///
    /// The state is checked under the page lock, so concurrent callers fetch
    /// at most once. Returns whether a fetch happened.
    pub fn fill_if_invalid<I: PageInstaller>(
        &self,
        page: usize,
        installer: &I,
    ) -> DsmResult<bool> {
        let _guard = self.space.directory.lock_page(page)?;
        if self.space.directory.get(page)? != PageState::Invalid {
            return Ok(false);
        }

        let content = self.resolve(page, FaultKind::Read)?;
        tracing::debug!("Filled invalid page {} on access", page);
        installer.install(page, &content)?;
        Ok(true)
    }
}
