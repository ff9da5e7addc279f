//! Per-page MSI coherence directory.
//!
//! One state slot per page. Slots are atomics so point reads and writes never
//! block; the separate per-page lock serializes the compound sequences (state
//! check + install, evict + state change) that must not interleave on a page.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{DsmError, DsmResult};

/// Coherence state of one page on one node
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    /// No usable local copy; any access faults
    Invalid = b'I',
    /// Read-stable local copy, possibly replicated on the peer
    Shared = b'S',
    /// Locally written copy this node believes is the only live one
    Modified = b'M',
}

impl PageState {
    pub fn as_char(self) -> char {
        self as u8 as char
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            b'S' => PageState::Shared,
            b'M' => PageState::Modified,
            _ => PageState::Invalid,
        }
    }
}

impl std::fmt::Display for PageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Render a directory snapshot as one letter per page, e.g. `MSII`
pub fn format_states(states: &[PageState]) -> String {
    states.iter().map(|s| s.as_char()).collect()
}

/// Held while a compound operation on one page is in progress
pub type PageGuard<'a> = MutexGuard<'a, ()>;

/// Coherence directory for one node
pub struct Directory {
    states: Vec<AtomicU8>,
    page_locks: Vec<Mutex<()>>,
}

impl Directory {
    /// Directory of `num_pages` pages, all `Invalid`
    pub fn new(num_pages: usize) -> Self {
        Self {
            states: (0..num_pages)
                .map(|_| AtomicU8::new(PageState::Invalid as u8))
                .collect(),
            page_locks: (0..num_pages).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn slot(&self, page: usize) -> DsmResult<&AtomicU8> {
        self.states.get(page).ok_or(DsmError::PageOutOfRange {
            page: page as u64,
            num_pages: self.states.len(),
        })
    }

    pub fn get(&self, page: usize) -> DsmResult<PageState> {
        Ok(PageState::from_raw(self.slot(page)?.load(Ordering::Acquire)))
    }

    /// Set the state of `page`, returning the previous state
    pub fn set(&self, page: usize, state: PageState) -> DsmResult<PageState> {
        let prev = self.slot(page)?.swap(state as u8, Ordering::AcqRel);
        tracing::trace!("page {}: {} -> {}", page, PageState::from_raw(prev), state);
        Ok(PageState::from_raw(prev))
    }

    /// Move `page` from `current` to `new` only if it is still in `current`.
    /// Returns whether the transition happened.
    pub fn transition(&self, page: usize, current: PageState, new: PageState) -> DsmResult<bool> {
        Ok(self
            .slot(page)?
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    /// Take the exclusion lock of `page`.
    ///
    /// Poisoning is ignored: the guarded data is `()`, and the state slot
    /// itself is always consistent.
    pub fn lock_page(&self, page: usize) -> DsmResult<PageGuard<'_>> {
        let lock = self.page_locks.get(page).ok_or(DsmError::PageOutOfRange {
            page: page as u64,
            num_pages: self.page_locks.len(),
        })?;
        Ok(lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Copy of every page's state
    pub fn snapshot(&self) -> Vec<PageState> {
        self.states
            .iter()
            .map(|s| PageState::from_raw(s.load(Ordering::Acquire)))
            .collect()
    }
}
