//! Building, encoding and decoding messages.
//!
//! Producers call [`build`] and then [`Codec::encode`], which validates before
//! serializing. Consumers call [`Codec::decode`], which rejects malformed bytes
//! before schema validation and invalid documents before typed decoding.

use crate::envelope::{Envelope, Source, SCHEMA_VERSION};
use crate::error::{ParseError, ProtocolError, Result};
use crate::message::Message;
use crate::payload::Payload;
use crate::schema::{SchemaError, SchemaRegistry, ValidationError};
use arturo_core::unix_timestamp_secs;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Linkage fields for [`build`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub correlation_id: Option<Uuid>,
    pub reply_to: Option<String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Options for answering `request`: its correlation id, no reply address.
    pub fn answering(request: &Message) -> Self {
        Self {
            correlation_id: request.correlation_id(),
            reply_to: None,
        }
    }
}

/// Wrap `payload` in a fresh envelope.
///
/// The id is a new UUID v4, the timestamp is the current time and the type
/// follows the payload variant. `correlation_id` and `reply_to` are taken
/// from `opts` only where the type calls for them and dropped otherwise.
pub fn build(source: &Source, payload: impl Into<Payload>, opts: BuildOptions) -> Result<Message> {
    let payload = payload.into();
    let message_type = payload.message_type();

    let correlation_id = if message_type.requires_correlation() {
        match opts.correlation_id {
            Some(id) => Some(id),
            None => {
                return Err(ProtocolError::MissingCorrelationContext {
                    message_type,
                    missing: "correlation_id",
                })
            }
        }
    } else {
        None
    };

    let reply_to = if message_type.requires_reply_to() {
        match opts.reply_to {
            Some(address) => Some(address),
            None => {
                return Err(ProtocolError::MissingCorrelationContext {
                    message_type,
                    missing: "reply_to",
                })
            }
        }
    } else {
        None
    };

    let envelope = Envelope {
        id: Uuid::new_v4(),
        timestamp: unix_timestamp_secs(),
        source: source.clone(),
        schema_version: SCHEMA_VERSION.to_string(),
        message_type,
        correlation_id,
        reply_to,
    };
    Ok(Message::from_parts(envelope, payload))
}

/// Turn raw bytes into a JSON object, or explain why not.
pub fn parse_document(bytes: &[u8]) -> std::result::Result<Value, ParseError> {
    let text = std::str::from_utf8(bytes)?;
    let value: Value = serde_json::from_str(text)?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Array(_) => Err(ParseError::NotAnObject("array")),
        Value::String(_) => Err(ParseError::NotAnObject("string")),
        Value::Number(_) => Err(ParseError::NotAnObject("number")),
        Value::Bool(_) => Err(ParseError::NotAnObject("boolean")),
        Value::Null => Err(ParseError::NotAnObject("null")),
    }
}

/// Validating encoder/decoder bound to a schema registry.
#[derive(Debug, Clone)]
pub struct Codec {
    registry: Arc<SchemaRegistry>,
}

impl Codec {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Codec over the schemas compiled into this crate.
    pub fn bundled() -> std::result::Result<Self, SchemaError> {
        Ok(Self::new(Arc::new(SchemaRegistry::bundled()?)))
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Validate a typed message against both schemas.
    pub fn validate(&self, message: &Message) -> Result<()> {
        let document = message.to_value().map_err(ProtocolError::Serialize)?;
        self.registry.validate_message(&document)?;
        Ok(())
    }

    /// Validate a raw document against both schemas.
    pub fn validate_document(&self, document: &Value) -> std::result::Result<(), ValidationError> {
        self.registry.validate_message(document)
    }

    /// parse → validate → typed message.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let document = parse_document(bytes)?;
        self.decode_document(document)
    }

    /// validate → typed message, for callers that already hold a document.
    pub fn decode_document(&self, document: Value) -> Result<Message> {
        self.registry.validate_message(&document)?;
        serde_json::from_value(document).map_err(ProtocolError::Decode)
    }

    /// validate → serialize.
    pub fn encode(&self, message: &Message) -> Result<String> {
        let document = message.to_value().map_err(ProtocolError::Serialize)?;
        self.registry.validate_message(&document)?;
        serde_json::to_string(&document).map_err(ProtocolError::Serialize)
    }
}
