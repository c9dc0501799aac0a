//! Router error types

use arturo_bus::BusError;
use arturo_protocol::{MessageType, ProtocolError};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the command router, station consumer and broadcast
/// channels.
#[derive(Debug, Error)]
pub enum RouterError {
    /// An outgoing message failed to build or validate. Nothing was sent.
    #[error("invalid outgoing message: {0}")]
    InvalidPayload(#[source] ProtocolError),

    /// An incoming message could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Station name that cannot address a command stream.
    #[error("invalid station name: {0:?}")]
    InvalidStation(String),

    /// The deadline for this timeout cannot be represented.
    #[error("command timeout {0:?} is out of range")]
    InvalidTimeout(Duration),

    /// No correlated response arrived before the deadline.
    #[error("command {correlation_id} to {station} timed out after {timeout:?}")]
    CommandTimeout {
        correlation_id: Uuid,
        station: String,
        timeout: Duration,
    },

    /// The isolation policy denied a bus operation.
    #[error(transparent)]
    Unauthorized(BusError),

    #[error(transparent)]
    Bus(BusError),

    /// A message type that does not belong on the channel.
    #[error("{message_type} may not be published on {channel}")]
    WrongChannel {
        channel: String,
        message_type: MessageType,
    },

    /// The request has nowhere to send a response.
    #[error("request {0} carries no reply_to address")]
    NoReplyAddress(Uuid),

    /// The pending entry disappeared without a response or a timeout.
    #[error("command {0} was cancelled")]
    Cancelled(Uuid),
}

impl From<BusError> for RouterError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Unauthorized { .. } => RouterError::Unauthorized(err),
            other => RouterError::Bus(other),
        }
    }
}

impl RouterError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RouterError::CommandTimeout { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RouterError::Unauthorized(_))
    }
}

/// Result alias for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;
