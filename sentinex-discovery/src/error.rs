//! Error types for the discovery engine

use thiserror::Error;

/// Discovery engine error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The registry holds no master right now
    #[error("No masters available")]
    NoMastersAvailable,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Engine is closed")]
    Closed,

    /// Shutdown completed, but some close operations failed
    #[error("Shutdown finished with {failed} of {total} close operations failing")]
    PartialShutdown { failed: usize, total: usize },
}

/// Result type for discovery operations
pub type Result<T> = std::result::Result<T, Error>;
