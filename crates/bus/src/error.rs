//! Bus error types.

use crate::isolation::Operation;
use thiserror::Error;

/// Errors raised by substrate operations and isolation checks.
#[derive(Debug, Error)]
pub enum BusError {
    /// The isolation policy denied the operation.
    #[error("{identity} is not authorized to {operation} on {address}")]
    Unauthorized {
        identity: String,
        operation: Operation,
        address: String,
    },

    /// A rule was refused at policy construction time.
    #[error("isolation rule for {identity} rejected: {reason}")]
    RuleRejected { identity: String, reason: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Reading or acknowledging through a group that was never created.
    #[error("no consumer group {group} on stream {stream}")]
    NoGroup { stream: String, group: String },
}

/// Result alias for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
