//! Error types for the Tollgate rate limiter.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// These never reach consumers of [`crate::ratelimit::RateLimitClient`]; the
/// client logs them and reports [`crate::ratelimit::RateLimitResult::Error`].
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by the shared store (connection, script, protocol)
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Arguments passed to the bucket procedure were rejected
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored bucket record could not be decoded
    #[error("Malformed bucket record: {0}")]
    MalformedRecord(String),

    /// A store call did not complete in time
    #[error("Store call timed out after {0} ms")]
    Timeout(u64),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
