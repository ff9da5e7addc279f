//! Two nodes wired over localhost TCP without fault interception.
//!
//! Each node has a real request server and peer client; faults are raised
//! explicitly by the harness (a read of an `Invalid` page) and installed with
//! plain stores, so these tests run where userfaultfd is not permitted.

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pagedsm::constants::system_page_size;
use pagedsm::fault::{DirectInstaller, FaultKind, FaultResolver, PageFault};
use pagedsm::memory::{PageState, Region, SharedSpace};
use pagedsm::rpc::{FetchReply, PeerClient, PeerServer, RpcHandlerContext};

pub struct LoopbackNode {
    pub space: Arc<SharedSpace>,
    pub client: Arc<PeerClient>,
    resolver: FaultResolver<PeerClient>,
}

impl LoopbackNode {
    fn fault(&self, page: usize, kind: FaultKind) {
        let fault = PageFault {
            address: self.space.region.base_addr() + page * self.space.page_size(),
            kind,
        };
        self.resolver
            .handle(fault, &DirectInstaller::new(&self.space.region))
            .unwrap();
    }

    /// Read a page, filling it from the peer first if it is `Invalid`
    pub fn read(&self, page: usize) -> Vec<u8> {
        self.resolver
            .fill_if_invalid(page, &DirectInstaller::new(&self.space.region))
            .unwrap();
        self.space.region.read_page(page).unwrap()
    }

    /// Write a page and run write completion
    pub fn write(&self, page: usize, data: &[u8]) {
        self.fault(page, FaultKind::Write);
        self.space.region.write_page(page, data).unwrap();
        self.client.send_invalidate(page).unwrap();
        self.space.directory.set(page, PageState::Modified).unwrap();
    }

    pub fn state(&self, page: usize) -> PageState {
        self.space.directory.get(page).unwrap()
    }

    /// Wait until the peer has handled every request this node sent.
    ///
    /// A Fetch for a page past the end is answered without side effects, and
    /// the peer serves its inbound stream in order.
    pub fn barrier(&self) {
        let reply = self
            .client
            .fetch(self.space.num_pages(), self.space.page_size())
            .unwrap();
        assert_eq!(reply, FetchReply::Absent);
    }
}

fn serve(space: Arc<SharedSpace>) -> String {
    let ctx = Arc::new(RpcHandlerContext::with_space(space, 1024));
    let server = PeerServer::bind("127.0.0.1:0", ctx).unwrap();
    let addr = server.local_addr().unwrap().to_string();
    thread::spawn(move || {
        // Ends with PeerDisconnected once the peer's client is dropped
        let _ = server.run();
    });
    addr
}

/// Two connected nodes sharing a region of `pages` pages
pub fn loopback_pair(pages: usize) -> (LoopbackNode, LoopbackNode) {
    let page_size = system_page_size();
    let space_a = Arc::new(SharedSpace::new(Region::with_pages(pages, page_size).unwrap()));
    let space_b = Arc::new(SharedSpace::new(Region::with_pages(pages, page_size).unwrap()));

    let addr_a = serve(Arc::clone(&space_a));
    let addr_b = serve(Arc::clone(&space_b));

    let retry = Duration::from_millis(10);
    let (client_a, _) = PeerClient::connect(&addr_b, retry).unwrap();
    let (client_b, _) = PeerClient::connect(&addr_a, retry).unwrap();

    let node = |space: Arc<SharedSpace>, client: PeerClient| {
        let client = Arc::new(client);
        LoopbackNode {
            resolver: FaultResolver::new(Arc::clone(&space), Arc::clone(&client)),
            space,
            client,
        }
    };

    (node(space_a, client_a), node(space_b, client_b))
}

/// `data` zero padded to one page
pub fn padded(data: &[u8], page_size: usize) -> Vec<u8> {
    let mut page = vec![0u8; page_size];
    let n = data.len().min(page_size);
    page[..n].copy_from_slice(&data[..n]);
    page
}

/// A localhost port that was free a moment ago
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Poll `cond` until it holds or `timeout` elapses
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
