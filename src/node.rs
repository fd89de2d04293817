//! Node Transport Abstraction
//!
//! A coordinator only ever talks to its peers through the [`Node`] trait.
//! Concrete impls are the local [`ElectionCoordinator`] itself and the
//! [`ProxyNode`] link simulator that wraps one for tests.
//!
//! [`ElectionCoordinator`]: crate::coordinator::ElectionCoordinator
//! [`ProxyNode`]: crate::proxy::ProxyNode

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CommunicationError;

/// Local health flag of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivelinessState {
    /// Node participates in elections and answers peers
    Healthy,
    /// Node refuses election participation (fault-injected or failed)
    Faulty,
}

impl std::fmt::Display for LivelinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LivelinessState::Healthy => write!(f, "HEALTHY"),
            LivelinessState::Faulty => write!(f, "FAULTY"),
        }
    }
}

/// Reply to an election message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionReply {
    /// The peer is healthy and will contend for leadership itself
    Ok,
    /// The peer is faulty and refuses to participate
    Fail,
}

impl std::fmt::Display for ElectionReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionReply::Ok => write!(f, "OK"),
            ElectionReply::Fail => write!(f, "FAIL"),
        }
    }
}

/// Capability set every peer-reachable endpoint implements.
///
/// `priority_id` and `is_leader` are local reads and never fail; the
/// remaining calls cross the (possibly simulated) network and can fail with
/// [`CommunicationError`].
#[async_trait]
pub trait Node: Send + Sync {
    /// Immutable priority of the node; higher value wins elections.
    fn priority_id(&self) -> i64;

    /// Current health of the node, as a remote probe.
    async fn liveliness_state(&self) -> Result<LivelinessState, CommunicationError>;

    /// Sent by a lower-priority peer starting an election. A healthy
    /// receiver acknowledges with [`ElectionReply::Ok`] and contends for
    /// leadership itself; a faulty receiver replies [`ElectionReply::Fail`].
    async fn election_message(&self) -> Result<ElectionReply, CommunicationError>;

    /// Victory announcement from the winner of an election.
    async fn coordinate_message(&self, leader_priority_id: i64)
        -> Result<(), CommunicationError>;

    /// Whether this node currently believes itself to be the leader.
    /// Local belief, not a globally synchronized fact.
    fn is_leader(&self) -> bool;
}
