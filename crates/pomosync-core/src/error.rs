//! Error types for pomosync.

use thiserror::Error;

/// Result type for pomosync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside the timer state machine itself.
///
/// Timer operations never fail: a broken transport or a refused notification
/// permission degrades to local-only behaviour instead of surfacing here.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value
    #[error("Invalid config {key}: {reason}")]
    Config { key: &'static str, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
