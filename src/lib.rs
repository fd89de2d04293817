//! Stampede - Asynchronous Bully Leader Election
//!
//! An implementation of the Bully leader-election algorithm for groups of
//! peer processes, each identified by a unique numeric priority. At most one
//! node considers itself leader at a time; when the leader becomes
//! unreachable or faulty, the surviving node with the highest priority
//! eventually takes over.
//!
//! # Architecture
//!
//! Every node runs an [`ElectionCoordinator`]: a periodic tick task probes
//! the current leader's health and starts an election when the leader stops
//! answering. Elections fan out concurrently to all higher-priority peers;
//! a node that hears no healthy higher-priority peer promotes itself and
//! broadcasts a coordinate message to the whole group.
//!
//! Nodes talk to each other only through the [`Node`] trait, so the wiring
//! between coordinators is pluggable. [`ProxyNode`] provides the reference
//! transport: an in-process link that can inject per-call delay and
//! probabilistic message drops for fault-tolerance testing.
//!
//! # Features
//!
//! - Concurrent election fan-out with per-call reply timeouts
//! - Heartbeat-driven failure detection with configurable probe budget
//! - Fault injection (mark nodes faulty/healthy at runtime)
//! - Bounded or unbounded per-node worker budget for peer calls
//! - Link simulator with fixed delay and probabilistic drops
//!
//! [`ElectionCoordinator`]: coordinator::ElectionCoordinator
//! [`Node`]: node::Node
//! [`ProxyNode`]: proxy::ProxyNode

pub mod config;
pub mod coordinator;
pub mod error;
pub mod node;
pub mod proxy;

pub use config::CoordinatorConfig;
pub use coordinator::{ElectionCoordinator, ElectionState};
pub use error::{CommunicationError, Error, Result};
pub use node::{ElectionReply, LivelinessState, Node};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::CoordinatorConfig;
    pub use crate::coordinator::{ElectionCoordinator, ElectionState};
    pub use crate::error::{CommunicationError, Error, Result};
    pub use crate::node::{ElectionReply, LivelinessState, Node};
    pub use crate::proxy::ProxyNode;
}
