//! Envelope metadata shared by every message.

use crate::message_type::MessageType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The only schema version this crate produces or accepts.
pub const SCHEMA_VERSION: &str = "v1.0.0";

/// Producer identity stamped into `envelope.source`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    /// Service name, `^[a-z][a-z0-9_]*$`.
    pub service: String,
    /// Instance name, `^[a-z0-9][a-z0-9_-]*$`.
    pub instance: String,
    /// Producer software version, `MAJOR.MINOR.PATCH`.
    pub version: String,
}

impl Source {
    /// Create a source identity.
    pub fn new(
        service: impl Into<String>,
        instance: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            instance: instance.into(),
            version: version.into(),
        }
    }
}

/// Envelope of a message.
///
/// `correlation_id` and `reply_to` are omitted from the wire form when unset,
/// which is what the heartbeat and emergency-stop schemas require.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// Unique message id (UUID v4).
    pub id: Uuid,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    /// Producer identity.
    pub source: Source,
    /// Always [`SCHEMA_VERSION`] for messages built here.
    pub schema_version: String,
    /// Payload discriminator.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Links a response to its request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// Address the response must be appended to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}
