//! A DSM node: bootstrap, worker threads and the local access API.
//!
//! # Example
//!
//! ```rust,no_run
//! use pagedsm::config::DsmConfig;
//! use pagedsm::node::DsmNode;
//!
//! # fn example() -> pagedsm::error::DsmResult<()> {
//! let node = DsmNode::create_or_join(DsmConfig::with_ports(9000, 9001), || Ok(4))?;
//! node.write(0, b"hello")?;
//! let page = node.read(0)?;
//! assert_eq!(&page[..5], b"hello");
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use futures::executor::block_on;

use crate::config::{DsmConfig, FaultMode};
use crate::constants::{system_page_size, FAULT_THREAD_NAME, SERVER_THREAD_NAME};
use crate::error::{DsmError, DsmResult};
use crate::fault::{DirectInstaller, FaultHandler, FaultRegistration, FaultResolver};
use crate::memory::{format_states, PageState, Region, RegionInfo, SharedSpace};
use crate::rpc::{HelloToken, PeerClient, PeerServer, RpcHandlerContext};
use crate::signal::{fatal_signal, peek_fatal, FatalSignal, Trigger};

pub use bootstrap::{decide_role, NodeRole};
pub use worker::{spawn_worker, wait_or_fatal};

/// Pages targeted by a range operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSelection {
    One(usize),
    All,
}

impl PageSelection {
    /// Console-style index: `-1` selects every page
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            -1 => Some(PageSelection::All),
            i if i >= 0 => Some(PageSelection::One(i as usize)),
            _ => None,
        }
    }

    /// Page indices selected in a region of `num_pages` pages, in order
    pub fn pages(&self, num_pages: usize) -> Vec<usize> {
        match *self {
            PageSelection::One(page) => vec![page],
            PageSelection::All => (0..num_pages).collect(),
        }
    }
}

/// State letters of the selected pages: one letter for a single page, the
/// whole string for `All`. `None` if the page is past the end.
pub fn view_states(states: &[PageState], selection: PageSelection) -> Option<String> {
    match selection {
        PageSelection::One(page) => states.get(page).map(|state| state.to_string()),
        PageSelection::All => Some(format_states(states)),
    }
}

/// How missing pages of the local mapping get filled
enum Interception {
    /// Served by the fault thread
    Userfaultfd,
    /// Filled by `read` before it copies the page out
    Explicit(FaultResolver<PeerClient>),
}

/// State shared by the node handle and its worker threads
struct NodeShared {
    role: NodeRole,
    space: Arc<SharedSpace>,
    client: Arc<PeerClient>,
    interception: Interception,
    peer_hello: HelloToken,
    fatal: FatalSignal,
    // Keeps the fatal channel open for as long as the node lives
    _fatal_trigger: Arc<Trigger<String>>,
}

/// Handle to a running node. Cloning it shares the same node.
#[derive(Clone)]
pub struct DsmNode {
    shared: Arc<NodeShared>,
}

impl DsmNode {
    /// Start the request server, connect to the peer, agree on roles and
    /// bring up the shared region.
    ///
    /// `page_count` is only called when this node becomes the initiator and
    /// the config does not fix the page count.
    pub fn create_or_join<F>(config: DsmConfig, page_count: F) -> DsmResult<Self>
    where
        F: FnOnce() -> DsmResult<usize>,
    {
        config.validate()?;

        let page_size = system_page_size();
        let mode = config.region.fault_mode;
        let (fatal_trigger, fatal) = fatal_signal();
        let (ctx, waits) = RpcHandlerContext::new(page_size, config.region.max_pages);
        let ctx = Arc::new(ctx);

        let server = PeerServer::bind(&config.network.listen_endpoint(), Arc::clone(&ctx))?;
        spawn_worker(SERVER_THREAD_NAME, Arc::clone(&fatal_trigger), move || {
            server.run()
        })?;

        let retry = Duration::from_millis(config.network.connect_retry_ms);
        let (client, retries) = PeerClient::connect(&config.network.peer_endpoint(), retry)?;
        let client = Arc::new(client);

        let local_hello = HelloToken::new(retries);
        client.send_hello(local_hello)?;
        let peer_hello = wait_or_fatal(waits.peer_hello, &fatal)?;

        let role = decide_role(&local_hello, &peer_hello)?;
        tracing::info!("Bootstrap: this node is the {}", role);

        let (space, interception) = match role {
            NodeRole::Initiator => {
                let pages = match config.region.pages {
                    Some(pages) => pages,
                    None => page_count()?,
                };
                config.validate_page_count(pages)?;

                let space = Arc::new(SharedSpace::new(Region::with_pages(pages, page_size)?));
                let interception = start_interception(mode, &space, &client, &fatal_trigger)?;

                if !ctx.set_space(Arc::clone(&space)) {
                    return Err(DsmError::BootstrapConflict(
                        "peer announced a region while this node was initiating".to_string(),
                    ));
                }
                client.send_create(space.region.info())?;
                (space, interception)
            }
            NodeRole::Responder => {
                tracing::info!("Waiting for the initiator's Create");
                let space = wait_or_fatal(waits.space, &fatal)?;
                let interception = start_interception(mode, &space, &client, &fatal_trigger)?;
                (space, interception)
            }
        };

        tracing::info!(
            "Node ready: {} pages of {} bytes at {:#x}",
            space.num_pages(),
            space.page_size(),
            space.region.base_addr()
        );

        Ok(Self {
            shared: Arc::new(NodeShared {
                role,
                space,
                client,
                interception,
                peer_hello,
                fatal,
                _fatal_trigger: fatal_trigger,
            }),
        })
    }

    pub fn role(&self) -> NodeRole {
        self.shared.role
    }

    /// Geometry of the local mapping
    pub fn region(&self) -> RegionInfo {
        self.shared.space.region.info()
    }

    pub fn num_pages(&self) -> usize {
        self.shared.space.num_pages()
    }

    pub fn page_size(&self) -> usize {
        self.shared.space.page_size()
    }

    /// Copy out page `page`, faulting it in if needed
    pub fn read(&self, page: usize) -> DsmResult<Vec<u8>> {
        let space = &self.shared.space;
        let page = space.checked_page(page as u64)?;
        if let Interception::Explicit(resolver) = &self.shared.interception {
            resolver.fill_if_invalid(page, &DirectInstaller::new(&space.region))?;
        }
        space.region.read_page(page)
    }

    /// Overwrite page `page` with `data` (truncated or zero padded to one
    /// page), then invalidate the peer's copy.
    ///
    /// Returns the number of payload bytes stored.
    pub fn write(&self, page: usize, data: &[u8]) -> DsmResult<usize> {
        let page = self.shared.space.checked_page(page as u64)?;
        let written = self.shared.space.region.write_page(page, data)?;
        self.complete_write(page)?;
        Ok(written)
    }

    /// Read every selected page, in order
    pub fn read_range(&self, selection: PageSelection) -> DsmResult<Vec<(usize, Vec<u8>)>> {
        selection
            .pages(self.num_pages())
            .into_iter()
            .map(|page| Ok((page, self.read(page)?)))
            .collect()
    }

    /// Write `data` into every selected page, then complete the write for
    /// each page in order.
    pub fn write_range(&self, selection: PageSelection, data: &[u8]) -> DsmResult<()> {
        let pages = selection.pages(self.num_pages());
        for &page in &pages {
            let page = self.shared.space.checked_page(page as u64)?;
            self.shared.space.region.write_page(page, data)?;
        }
        for page in pages {
            self.complete_write(page)?;
        }
        Ok(())
    }

    fn complete_write(&self, page: usize) -> DsmResult<()> {
        self.shared.client.send_invalidate(page)?;
        self.shared.space.directory.set(page, PageState::Modified)?;
        Ok(())
    }

    /// Current coherence state of every page
    pub fn dump_state(&self) -> Vec<PageState> {
        self.shared.space.directory.snapshot()
    }

    /// Peer's bootstrap token as received
    pub fn peer_hello(&self) -> HelloToken {
        self.shared.peer_hello
    }

    pub fn fault_mode(&self) -> FaultMode {
        match self.shared.interception {
            Interception::Userfaultfd => FaultMode::Userfaultfd,
            Interception::Explicit(_) => FaultMode::Explicit,
        }
    }

    /// First fatal worker error, if any
    pub fn fatal_error(&self) -> Option<String> {
        peek_fatal(&self.shared.fatal)
    }

    /// Block until a worker thread fails and return its error
    pub fn wait_fatal(&self) -> String {
        block_on(self.shared.fatal.clone())
            .unwrap_or_else(|_| "fatal signal closed without a reason".to_string())
    }
}

fn start_interception(
    mode: FaultMode,
    space: &Arc<SharedSpace>,
    client: &Arc<PeerClient>,
    fatal: &Arc<Trigger<String>>,
) -> DsmResult<Interception> {
    match mode {
        FaultMode::Userfaultfd => {
            let registration = FaultRegistration::register(Arc::clone(space))?;
            let handler = FaultHandler::new(registration, Arc::clone(client));
            spawn_worker(FAULT_THREAD_NAME, Arc::clone(fatal), move || handler.run())?;
            Ok(Interception::Userfaultfd)
        }
        FaultMode::Explicit => {
            tracing::info!("Fault interception off; reads fill invalid pages explicitly");
            Ok(Interception::Explicit(FaultResolver::new(
                Arc::clone(space),
                Arc::clone(client),
            )))
        }
    }
}
