//! Initiator election.
//!
//! Both nodes evaluate [`decide_role`] on the same pair of Hello tokens (each
//! with the arguments swapped), so exactly one of them becomes the initiator.

use crate::error::{DsmError, DsmResult};
use crate::rpc::HelloToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Allocates the region and sends Create
    Initiator,
    /// Waits for the initiator's Create
    Responder,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Initiator => write!(f, "initiator"),
            NodeRole::Responder => write!(f, "responder"),
        }
    }
}

/// Decide this node's role from its own token and the peer's.
///
/// The node whose outbound connection needed retries started first and
/// becomes the initiator. If both or neither needed retries, the larger nonce
/// wins.
pub fn decide_role(local: &HelloToken, peer: &HelloToken) -> DsmResult<NodeRole> {
    match (local.needed_retry(), peer.needed_retry()) {
        (true, false) => Ok(NodeRole::Initiator),
        (false, true) => Ok(NodeRole::Responder),
        _ if local.nonce > peer.nonce => Ok(NodeRole::Initiator),
        _ if local.nonce < peer.nonce => Ok(NodeRole::Responder),
        _ => Err(DsmError::BootstrapConflict(format!(
            "both nodes drew nonce {:#018x}",
            local.nonce
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(connect_retries: u64, nonce: u64) -> HelloToken {
        HelloToken {
            connect_retries,
            nonce,
        }
    }

    fn roles(a: HelloToken, b: HelloToken) -> (NodeRole, NodeRole) {
        (decide_role(&a, &b).unwrap(), decide_role(&b, &a).unwrap())
    }

    #[test]
    fn test_retrying_node_initiates() {
        // The node that retried wins even with the smaller nonce
        assert_eq!(
            roles(token(3, 1), token(0, 99)),
            (NodeRole::Initiator, NodeRole::Responder)
        );
    }

    #[test]
    fn test_nonce_breaks_ties() {
        assert_eq!(
            roles(token(0, 5), token(0, 7)),
            (NodeRole::Responder, NodeRole::Initiator)
        );
        assert_eq!(
            roles(token(2, 9), token(1, 4)),
            (NodeRole::Initiator, NodeRole::Responder)
        );
    }

    #[test]
    fn test_equal_tokens_conflict() {
        assert!(matches!(
            decide_role(&token(0, 42), &token(0, 42)),
            Err(DsmError::BootstrapConflict(_))
        ));
    }

    #[test]
    fn test_exactly_one_initiator() {
        for a in 0..4u64 {
            for b in 0..4u64 {
                if a == b {
                    continue;
                }
                let (x, y) = roles(token(a % 2, a), token(b % 2, b));
                assert_ne!(x, y);
            }
        }
    }
}
