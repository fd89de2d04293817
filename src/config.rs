//! Stampede Configuration
//!
//! Configuration for a single election coordinator instance.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Concurrency budget for peer RPC fan-out during elections and
    /// coordinate broadcasts. 0 means unbounded.
    #[serde(default)]
    pub worker_pool_size: usize,

    /// How long to wait for a single election-message reply in milliseconds
    #[serde(default = "default_election_reply_timeout_ms")]
    pub election_reply_timeout_ms: u64,

    /// How many consecutive failed leader probes are tolerated per tick
    /// before a new election is started
    #[serde(default = "default_max_skip_heartbeat_count")]
    pub max_skip_heartbeat_count: u32,
}

// Default value functions
fn default_election_reply_timeout_ms() -> u64 {
    3000
}

fn default_max_skip_heartbeat_count() -> u32 {
    3
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 0,
            election_reply_timeout_ms: default_election_reply_timeout_ms(),
            max_skip_heartbeat_count: default_max_skip_heartbeat_count(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: CoordinatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.election_reply_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "election_reply_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.max_skip_heartbeat_count == 0 {
            return Err(crate::Error::Config(
                "max_skip_heartbeat_count must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Get the election reply timeout as Duration
    pub fn election_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.election_reply_timeout_ms)
    }
}
