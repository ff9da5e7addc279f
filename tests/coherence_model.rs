//! Property-based testing of the two-node coherence protocol
//!
//! A reference state machine models both directories and the bytes each node
//! would observe; random sequences of reads and writes are replayed against
//! two loopback nodes talking over localhost TCP, and after every step the
//! real directories and page contents must match the model.

mod common;

use proptest::prelude::*;
use proptest_state_machine::{prop_state_machine, ReferenceStateMachine, StateMachineTest};

use common::{loopback_pair, padded, LoopbackNode};
use pagedsm::constants::system_page_size;
use pagedsm::memory::PageState;

/// Pages in the modelled region
const NUM_PAGES: usize = 3;
/// Largest payload written in one step
const MAX_PAYLOAD: usize = 48;

#[derive(Clone, Debug)]
pub enum Transition {
    /// Node `node` writes `data` to `page`
    Write {
        node: usize,
        page: usize,
        data: Vec<u8>,
    },
    /// Node `node` reads `page`
    Read { node: usize, page: usize },
}

/// Expected state of one page on one node
#[derive(Clone, Debug, PartialEq)]
struct PageModel {
    state: PageState,
    /// Payload the node's copy holds, zero padded to a page when compared
    content: Vec<u8>,
}

impl Default for PageModel {
    fn default() -> Self {
        Self {
            state: PageState::Invalid,
            content: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CoherenceRefState {
    nodes: [Vec<PageModel>; 2],
}

impl Default for CoherenceRefState {
    fn default() -> Self {
        Self {
            nodes: [
                vec![PageModel::default(); NUM_PAGES],
                vec![PageModel::default(); NUM_PAGES],
            ],
        }
    }
}

impl CoherenceRefState {
    fn page(&self, node: usize, page: usize) -> &PageModel {
        &self.nodes[node][page]
    }
}

impl ReferenceStateMachine for CoherenceRefState {
    type State = Self;
    type Transition = Transition;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        prop_oneof![
            (
                0..2usize,
                0..NUM_PAGES,
                prop::collection::vec(any::<u8>(), 1..MAX_PAYLOAD)
            )
                .prop_map(|(node, page, data)| Transition::Write { node, page, data }),
            (0..2usize, 0..NUM_PAGES).prop_map(|(node, page)| Transition::Read { node, page }),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            Transition::Write { node, page, data } => {
                let peer = 1 - node;
                state.nodes[*node][*page] = PageModel {
                    state: PageState::Modified,
                    content: data.clone(),
                };
                // Invalidate evicts the peer's copy
                state.nodes[peer][*page] = PageModel::default();
            }
            Transition::Read { node, page } => {
                let peer = 1 - node;
                if state.nodes[*node][*page].state == PageState::Invalid {
                    // Fetch: the responder ends Shared whatever it held
                    let responder = &mut state.nodes[peer][*page];
                    responder.state = PageState::Shared;
                    let content = responder.content.clone();

                    state.nodes[*node][*page] = PageModel {
                        state: PageState::Shared,
                        content,
                    };
                }
            }
        }
        state
    }
}

pub struct CoherenceStateMachineTest {
    nodes: [LoopbackNode; 2],
    page_size: usize,
}

impl CoherenceStateMachineTest {
    fn check(&self, ref_state: &CoherenceRefState) {
        for (n, node) in self.nodes.iter().enumerate() {
            let states = node.space.directory.snapshot();
            for page in 0..NUM_PAGES {
                assert_eq!(
                    states[page],
                    ref_state.page(n, page).state,
                    "state mismatch on node {} page {}",
                    n,
                    page
                );
            }
        }
    }
}

impl StateMachineTest for CoherenceStateMachineTest {
    type SystemUnderTest = Self;
    type Reference = CoherenceRefState;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        let (a, b) = loopback_pair(NUM_PAGES);
        Self {
            nodes: [a, b],
            page_size: system_page_size(),
        }
    }

    fn apply(
        state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        match transition {
            Transition::Write { node, page, data } => {
                state.nodes[node].write(page, &data);
                state.nodes[node].barrier();
            }
            Transition::Read { node, page } => {
                let data = state.nodes[node].read(page);
                assert_eq!(
                    data,
                    padded(&ref_state.page(node, page).content, state.page_size),
                    "read mismatch on node {} page {}",
                    node,
                    page
                );
            }
        }
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.check(ref_state);
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        max_shrink_iters: 100,
        .. ProptestConfig::default()
    })]

    #[test]
    fn pbt_coherence_protocol(
        sequential 1..30 => CoherenceStateMachineTest
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_write_invalidates_peer() {
        let state = CoherenceRefState::default();
        let state = <CoherenceRefState as ReferenceStateMachine>::apply(
            state,
            &Transition::Write {
                node: 0,
                page: 1,
                data: b"x".to_vec(),
            },
        );
        assert_eq!(state.page(0, 1).state, PageState::Modified);
        assert_eq!(state.page(1, 1).state, PageState::Invalid);
    }

    #[test]
    fn test_reference_read_downgrades_writer() {
        let mut state = CoherenceRefState::default();
        state = <CoherenceRefState as ReferenceStateMachine>::apply(
            state,
            &Transition::Write {
                node: 1,
                page: 0,
                data: b"data".to_vec(),
            },
        );
        state = <CoherenceRefState as ReferenceStateMachine>::apply(
            state,
            &Transition::Read { node: 0, page: 0 },
        );
        assert_eq!(state.page(0, 0).content, b"data".to_vec());
        assert_eq!(state.page(0, 0).state, PageState::Shared);
        assert_eq!(state.page(1, 0).state, PageState::Shared);
    }
}
