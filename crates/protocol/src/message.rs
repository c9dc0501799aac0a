//! A complete message: envelope plus typed payload.

use crate::envelope::{Envelope, Source};
use crate::message_type::MessageType;
use crate::payload::{
    CommandRequestPayload, CommandResponsePayload, EmergencyStopPayload, HeartbeatPayload,
    OtaRequestPayload, Payload,
};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Envelope + payload. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    envelope: Envelope,
    payload: Payload,
}

impl Message {
    /// Assemble a message from parts.
    ///
    /// Prefer [`crate::codec::build`], which fills the envelope consistently.
    /// Nothing here checks that `envelope.type` agrees with the payload; the
    /// schemas catch a mismatch before the message leaves the process.
    pub fn from_parts(envelope: Envelope, payload: Payload) -> Self {
        Self { envelope, payload }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_parts(self) -> (Envelope, Payload) {
        (self.envelope, self.payload)
    }

    pub fn id(&self) -> Uuid {
        self.envelope.id
    }

    pub fn message_type(&self) -> MessageType {
        self.envelope.message_type
    }

    pub fn source(&self) -> &Source {
        &self.envelope.source
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.envelope.correlation_id
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.envelope.reply_to.as_deref()
    }

    pub fn as_command_request(&self) -> Option<&CommandRequestPayload> {
        match &self.payload {
            Payload::CommandRequest(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_command_response(&self) -> Option<&CommandResponsePayload> {
        match &self.payload {
            Payload::CommandResponse(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_heartbeat(&self) -> Option<&HeartbeatPayload> {
        match &self.payload {
            Payload::Heartbeat(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_emergency_stop(&self) -> Option<&EmergencyStopPayload> {
        match &self.payload {
            Payload::EmergencyStop(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_ota_request(&self) -> Option<&OtaRequestPayload> {
        match &self.payload {
            Payload::OtaRequest(p) => Some(p),
            _ => None,
        }
    }

    /// The JSON document this message serializes to.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMessage {
    envelope: Envelope,
    payload: Value,
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawMessage::deserialize(deserializer)?;
        let payload =
            Payload::from_value(raw.envelope.message_type, raw.payload).map_err(D::Error::custom)?;
        Ok(Message {
            envelope: raw.envelope,
            payload,
        })
    }
}
