//! Handlers for requests arriving from the peer.
//!
//! Every handler returns `Ok(())` for requests it drops (out-of-range page,
//! region not known yet, duplicate bootstrap frames); an `Err` is fatal to the
//! server loop.

use std::io::Write;
use std::sync::{Arc, OnceLock};

use futures::channel::oneshot;

use crate::error::{DsmError, DsmResult};
use crate::memory::{PageState, Region, RegionInfo, SharedSpace};
use crate::signal::Trigger;

use super::protocol::{FetchReply, HelloToken, PeerRequest};

/// State the request handlers act on
pub struct RpcHandlerContext {
    /// Shared space, known once the region is allocated locally or
    /// announced by the peer's Create
    space: OnceLock<Arc<SharedSpace>>,
    space_known: Trigger<Arc<SharedSpace>>,
    /// Peer's bootstrap token, delivered by its first Hello frame
    peer_hello: Trigger<HelloToken>,
    /// This node's page size
    pub page_size: usize,
    /// Largest region (in pages) accepted from a Create
    pub max_pages: usize,
}

/// Receivers the bootstrap blocks on while the request server fills in the
/// context
pub struct BootstrapWaits {
    pub space: oneshot::Receiver<Arc<SharedSpace>>,
    pub peer_hello: oneshot::Receiver<HelloToken>,
}

impl RpcHandlerContext {
    pub fn new(page_size: usize, max_pages: usize) -> (Self, BootstrapWaits) {
        let (space_known, space) = Trigger::new();
        let (peer_hello, hello) = Trigger::new();
        let ctx = Self {
            space: OnceLock::new(),
            space_known,
            peer_hello,
            page_size,
            max_pages,
        };
        (
            ctx,
            BootstrapWaits {
                space,
                peer_hello: hello,
            },
        )
    }

    /// Context whose region is already known
    pub fn with_space(space: Arc<SharedSpace>, max_pages: usize) -> Self {
        let (ctx, _waits) = Self::new(space.page_size(), max_pages);
        ctx.set_space(space);
        ctx
    }

    pub fn space(&self) -> Option<&Arc<SharedSpace>> {
        self.space.get()
    }

    /// Make the region known. Returns `false` if one already was.
    pub fn set_space(&self, space: Arc<SharedSpace>) -> bool {
        if self.space.set(Arc::clone(&space)).is_err() {
            return false;
        }
        self.space_known.fire(space);
        true
    }
}

/// Dispatch one decoded request. `reply` receives the Fetch answer.
pub fn dispatch<W: Write>(
    ctx: &RpcHandlerContext,
    request: PeerRequest,
    reply: &mut W,
) -> DsmResult<()> {
    tracing::debug!("Dispatching {:?}", request);
    match request {
        PeerRequest::Create(info) => handle_create(ctx, info),
        PeerRequest::Invalidate { page } => handle_invalidate(ctx, page),
        PeerRequest::Fetch { page } => handle_fetch(ctx, page, reply),
        PeerRequest::Hello(token) => handle_hello(ctx, token),
    }
}

/// Map the region announced by the initiator and release the bootstrap wait
pub fn handle_create(ctx: &RpcHandlerContext, info: RegionInfo) -> DsmResult<()> {
    if ctx.space().is_some() {
        tracing::warn!("Ignoring Create {:?}: region already known", info);
        return Ok(());
    }

    if info.page_size != ctx.page_size {
        return Err(DsmError::PageSizeMismatch {
            local: ctx.page_size,
            peer: info.page_size,
        });
    }

    if info.length == 0 || info.length % info.page_size != 0 || info.num_pages() > ctx.max_pages
    {
        tracing::warn!("Ignoring Create with unusable geometry {:?}", info);
        return Ok(());
    }

    let region = Region::allocate(Some(info.address), info.length, info.page_size)?;
    tracing::info!(
        "Mapped region announced by peer: {:#x} (hint {:#x}), {} bytes, {} pages",
        region.base_addr(),
        info.address,
        region.len(),
        region.num_pages()
    );

    if !ctx.set_space(Arc::new(SharedSpace::new(region))) {
        tracing::warn!("Region became known while handling Create; keeping the first one");
    }
    Ok(())
}

/// Drop the local copy of a page and mark it `Invalid`
pub fn handle_invalidate(ctx: &RpcHandlerContext, page: u64) -> DsmResult<()> {
    let Some(space) = ctx.space() else {
        tracing::warn!("Dropping Invalidate({}): region not known yet", page);
        return Ok(());
    };

    let page = match space.checked_page(page) {
        Ok(page) => page,
        Err(e) => {
            tracing::warn!("Dropping Invalidate: {}", e);
            return Ok(());
        }
    };

    let _guard = space.directory.lock_page(page)?;
    space.region.evict_page(page)?;
    let prev = space.directory.set(page, PageState::Invalid)?;
    tracing::debug!("Invalidated page {} (was {})", page, prev);
    Ok(())
}

/// Answer a Fetch.
///
/// `Modified` is downgraded to `Shared` before the page is sent. An `Invalid`
/// responder answers with the sentinel and still becomes `Shared`.
pub fn handle_fetch<W: Write>(ctx: &RpcHandlerContext, page: u64, reply: &mut W) -> DsmResult<()> {
    let Some(space) = ctx.space() else {
        tracing::warn!("Fetch({}) before region is known; answering absent", page);
        return FetchReply::Absent.write_to(reply);
    };

    let page = match space.checked_page(page) {
        Ok(page) => page,
        Err(e) => {
            // The requester blocks on a reply, so answer rather than drop
            tracing::warn!("Fetch for {}; answering absent", e);
            return FetchReply::Absent.write_to(reply);
        }
    };

    let answer = match space.directory.get(page)? {
        PageState::Modified | PageState::Shared => {
            if space
                .directory
                .transition(page, PageState::Modified, PageState::Shared)?
            {
                tracing::debug!("Downgraded page {} to Shared for peer fetch", page);
            }
            FetchReply::Page(space.region.read_page(page)?)
        }
        PageState::Invalid => {
            space.directory.set(page, PageState::Shared)?;
            FetchReply::Absent
        }
    };

    tracing::debug!(
        "Fetch({}) answered with {}",
        page,
        match answer {
            FetchReply::Absent => "sentinel",
            FetchReply::Page(_) => "page",
        }
    );
    answer.write_to(reply)
}

/// Record the peer's bootstrap token
pub fn handle_hello(ctx: &RpcHandlerContext, token: HelloToken) -> DsmResult<()> {
    if ctx.peer_hello.fire(token) {
        tracing::info!(
            "Peer hello: {} connect retries, nonce {:#018x}",
            token.connect_retries,
            token.nonce
        );
    } else {
        tracing::warn!("Ignoring repeated Hello {:?}", token);
    }
    Ok(())
}
