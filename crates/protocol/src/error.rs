//! Error types for message parsing, validation and construction.

use crate::message_type::MessageType;
use crate::schema::{SchemaError, ValidationError};
use thiserror::Error;

/// Raised before schema validation when the bytes are not a JSON object.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("message top level must be a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Protocol-layer errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A request or response was built without its linkage fields.
    #[error("{message_type} requires {missing}")]
    MissingCorrelationContext {
        message_type: MessageType,
        missing: &'static str,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A validated document still failed typed decoding. Indicates the
    /// schema documents and payload types disagree.
    #[error("typed decode failed after validation: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
