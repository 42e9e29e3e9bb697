//! Error types for the Bulwark resilience layer.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Bulwark operations.
#[derive(Error, Debug)]
pub enum BulwarkError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller supplied an argument the component cannot act on
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The durable counter store rejected or failed a query
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The durable counter store did not answer in time
    #[error("Storage round-trip timed out after {0:?}")]
    StoreTimeout(Duration),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for BulwarkError {
    fn from(err: config::ConfigError) -> Self {
        BulwarkError::Config(err.to_string())
    }
}

/// Result type alias for Bulwark operations.
pub type Result<T> = std::result::Result<T, BulwarkError>;
