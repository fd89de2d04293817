//! Stampede Error Types

use thiserror::Error;

/// Result type alias for Stampede operations
pub type Result<T> = std::result::Result<T, Error>;

/// Stampede error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Transport errors
    #[error(transparent)]
    Communication(#[from] CommunicationError),
}

/// Transport-boundary failure: the target peer could not be reached.
///
/// This is the single error kind peer calls can raise. Callers always treat
/// it as "peer currently unreachable/unhealthy", log it, and fold it into the
/// protocol decision at hand; it is never escalated past the call site.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("communication failure with node {target_priority_id}")]
pub struct CommunicationError {
    /// Priority id of the peer the failed call was addressed to
    pub target_priority_id: i64,
}

impl CommunicationError {
    pub fn new(target_priority_id: i64) -> Self {
        Self { target_priority_id }
    }
}
