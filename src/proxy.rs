//! Node-to-Node Link Simulator
//!
//! Wraps a peer handle and impairs remote calls with a fixed per-call delay
//! and a probabilistic drop, emulating a lossy network link. Local reads
//! (`priority_id`, `is_leader`) pass through untouched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::CommunicationError;
use crate::node::{ElectionReply, LivelinessState, Node};

/// Simulated lossy link in front of a peer
pub struct ProxyNode {
    inner: Arc<dyn Node>,
    delay: Duration,
    /// Probability (0-100) that a call is dropped with a communication error
    drop_percentage: u8,
}

impl ProxyNode {
    pub fn new(inner: Arc<dyn Node>, delay: Duration, drop_percentage: u8) -> Self {
        Self {
            inner,
            delay,
            drop_percentage,
        }
    }

    /// Apply the link faults: roll for a drop first, then delay.
    async fn impair(&self) -> Result<(), CommunicationError> {
        if self.drop_percentage > 0 {
            let roll: u8 = rand::thread_rng().gen_range(0..100);
            if roll < self.drop_percentage {
                return Err(CommunicationError::new(self.inner.priority_id()));
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Node for ProxyNode {
    fn priority_id(&self) -> i64 {
        self.inner.priority_id()
    }

    async fn liveliness_state(&self) -> Result<LivelinessState, CommunicationError> {
        self.impair().await?;
        self.inner.liveliness_state().await
    }

    async fn election_message(&self) -> Result<ElectionReply, CommunicationError> {
        self.impair().await?;
        self.inner.election_message().await
    }

    async fn coordinate_message(
        &self,
        leader_priority_id: i64,
    ) -> Result<(), CommunicationError> {
        self.impair().await?;
        self.inner.coordinate_message(leader_priority_id).await
    }

    fn is_leader(&self) -> bool {
        self.inner.is_leader()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::coordinator::ElectionCoordinator;
    use std::time::Instant;

    fn wrapped(priority: i64, delay: Duration, drop_percentage: u8) -> ProxyNode {
        let node = ElectionCoordinator::new(priority, CoordinatorConfig::default());
        ProxyNode::new(Arc::new(node), delay, drop_percentage)
    }

    #[tokio::test]
    async fn test_clean_link_passes_through() {
        let proxy = wrapped(5, Duration::ZERO, 0);

        assert_eq!(proxy.priority_id(), 5);
        assert!(!proxy.is_leader());
        assert_eq!(
            proxy.liveliness_state().await.unwrap(),
            LivelinessState::Healthy
        );
    }

    #[tokio::test]
    async fn test_full_drop_always_fails() {
        let proxy = wrapped(5, Duration::ZERO, 100);

        for _ in 0..20 {
            let err = proxy.liveliness_state().await.unwrap_err();
            assert_eq!(err.target_priority_id, 5);
        }
        // Local reads are never impaired
        assert_eq!(proxy.priority_id(), 5);
    }

    #[tokio::test]
    async fn test_delay_is_applied() {
        let proxy = wrapped(5, Duration::from_millis(50), 0);

        let started = Instant::now();
        proxy.liveliness_state().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
