//! Error types for the tatlimit crate.

use std::time::Duration;

use thiserror::Error;

/// Main error type for rate limiter operations.
///
/// A store failure is never turned into a grant or a denial. Callers decide
/// whether to fail open or fail closed.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// The backing store could not be reached or rejected the command
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The store round trip did not complete within the configured timeout
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// Zero rate or zero period supplied to a gating call
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    /// The all-zero "no policy configured" limit was used to gate traffic
    #[error("Limit is not configured (rate, burst and period are all zero)")]
    UnconfiguredLimit,

    /// Requested count cannot be represented exactly by the store
    #[error("Invalid requested count: {0}")]
    InvalidCount(u64),

    /// The store answered with something other than the GCRA 4-tuple
    #[error("Malformed store reply: {0}")]
    MalformedReply(String),

    /// A blocking call was issued from inside an async runtime
    #[error("Blocking rate limiter called from within an async runtime")]
    BlockingInAsync,

    /// The private runtime of the blocking limiter could not be built
    #[error("Failed to build runtime: {0}")]
    Runtime(std::io::Error),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
