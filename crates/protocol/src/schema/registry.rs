//! Immutable registry of the compiled message schemas.

use super::meta::check_document;
use super::validator::{CompiledSchema, ValidationError};
use super::SchemaError;
use crate::message_type::MessageType;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const ENVELOPE_FILE: &str = "envelope.schema.json";
const ERROR_FILE: &str = "error.schema.json";

const BUNDLED_ENVELOPE: &str = include_str!("../../schemas/v1.0.0/envelope.schema.json");
const BUNDLED_ERROR: &str = include_str!("../../schemas/v1.0.0/error.schema.json");

fn bundled_type_schema(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::DeviceCommandRequest => {
            include_str!("../../schemas/v1.0.0/device-command-request.schema.json")
        }
        MessageType::DeviceCommandResponse => {
            include_str!("../../schemas/v1.0.0/device-command-response.schema.json")
        }
        MessageType::ServiceHeartbeat => {
            include_str!("../../schemas/v1.0.0/service-heartbeat.schema.json")
        }
        MessageType::SystemEmergencyStop => {
            include_str!("../../schemas/v1.0.0/system-emergency-stop.schema.json")
        }
        MessageType::SystemOtaRequest => {
            include_str!("../../schemas/v1.0.0/system-ota-request.schema.json")
        }
    }
}

/// Compiled envelope, error and per-type schemas.
///
/// Built once at startup and shared behind an `Arc`; nothing mutates it
/// afterwards. Every document is meta-checked while loading, so a registry
/// that exists is known to be usable.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    envelope: CompiledSchema,
    error: CompiledSchema,
    types: HashMap<MessageType, CompiledSchema>,
}

impl SchemaRegistry {
    /// Registry over the `v1.0.0` documents compiled into the crate.
    pub fn bundled() -> Result<Self, SchemaError> {
        Self::from_sources(|name| {
            let source = match name {
                ENVELOPE_FILE => BUNDLED_ENVELOPE,
                ERROR_FILE => BUNDLED_ERROR,
                _ => MessageType::ALL
                    .iter()
                    .find(|t| schema_file(**t) == name)
                    .map(|t| bundled_type_schema(*t))
                    .unwrap_or(""),
            };
            Ok(source.to_string())
        })
    }

    /// Registry over `<dir>/envelope.schema.json`, `<dir>/error.schema.json`
    /// and `<dir>/<type-dir>.schema.json`.
    pub fn from_dir(dir: &Path) -> Result<Self, SchemaError> {
        debug!(dir = %dir.display(), "loading schemas from directory");
        Self::from_sources(|name| {
            let path = dir.join(name);
            std::fs::read_to_string(&path).map_err(|source| SchemaError::Io { path, source })
        })
    }

    fn from_sources<F>(mut read: F) -> Result<Self, SchemaError>
    where
        F: FnMut(&str) -> Result<String, SchemaError>,
    {
        let mut load = |name: &str| -> Result<CompiledSchema, SchemaError> {
            let text = read(name)?;
            let document: Value = serde_json::from_str(&text).map_err(|source| {
                SchemaError::Json {
                    name: name.to_string(),
                    source,
                }
            })?;
            check_document(&document).map_err(|e| e.in_document(name))
        };

        let envelope = load(ENVELOPE_FILE)?;
        let error = load(ERROR_FILE)?;
        let mut types = HashMap::new();
        for message_type in MessageType::ALL {
            types.insert(message_type, load(&schema_file(message_type))?);
        }
        Ok(Self {
            envelope,
            error,
            types,
        })
    }

    /// Generic envelope schema.
    pub fn envelope(&self) -> &CompiledSchema {
        &self.envelope
    }

    /// Standalone error-object schema.
    pub fn error_schema(&self) -> &CompiledSchema {
        &self.error
    }

    /// Whole-message schema for one type.
    pub fn for_type(&self, message_type: MessageType) -> Option<&CompiledSchema> {
        self.types.get(&message_type)
    }

    /// Run the envelope schema, then the schema selected by `envelope.type`.
    pub fn validate_message(&self, document: &Value) -> Result<(), ValidationError> {
        self.envelope.validate(document)?;
        match self.type_schema_of(document) {
            Some(schema) => schema.validate(document),
            None => Ok(()),
        }
    }

    /// Every violation from both schemas.
    pub fn validate_message_all(&self, document: &Value) -> Vec<ValidationError> {
        let mut errors = self.envelope.validate_all(document);
        if let Some(schema) = self.type_schema_of(document) {
            errors.extend(schema.validate_all(document));
        }
        errors
    }

    /// Unknown types never get here after the envelope schema passed, and
    /// in collect-all mode the envelope errors already cover them.
    fn type_schema_of(&self, document: &Value) -> Option<&CompiledSchema> {
        document
            .pointer("/envelope/type")
            .and_then(Value::as_str)
            .and_then(|t| t.parse::<MessageType>().ok())
            .and_then(|t| self.types.get(&t))
    }
}

/// File name of the whole-message schema for `message_type`.
pub fn schema_file(message_type: MessageType) -> String {
    format!("{}.schema.json", message_type.schema_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Constraint;
    use serde_json::json;

    fn heartbeat() -> Value {
        json!({
            "envelope": {
                "id": "550e8400-e29b-41d4-a716-446655440000",
                "timestamp": 1771329600,
                "source": {"service": "esp32_tcp_bridge", "instance": "station-01", "version": "1.0.0"},
                "schema_version": "v1.0.0",
                "type": "service.heartbeat"
            },
            "payload": {
                "status": "running",
                "uptime_seconds": 3600,
                "devices": [],
                "free_heap": 245000,
                "wifi_rssi": -42,
                "firmware_version": "1.0.0"
            }
        })
    }

    #[test]
    fn test_bundled_registry_loads_every_type() {
        let registry = SchemaRegistry::bundled().unwrap();
        for message_type in MessageType::ALL {
            assert!(registry.for_type(message_type).is_some());
        }
        assert_eq!(registry.envelope().title(), Some("Arturo Message Envelope"));
    }

    #[test]
    fn test_from_dir_matches_bundled() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas/v1.0.0");
        let registry = SchemaRegistry::from_dir(&dir).unwrap();
        assert!(registry.validate_message(&heartbeat()).is_ok());
    }

    #[test]
    fn test_from_missing_dir_reports_io() {
        let result = SchemaRegistry::from_dir(Path::new("/nonexistent/arturo/schemas"));
        assert!(matches!(result, Err(SchemaError::Io { .. })));
    }

    #[test]
    fn test_envelope_schema_runs_first() {
        let registry = SchemaRegistry::bundled().unwrap();
        let mut document = heartbeat();
        document["envelope"]["type"] = json!("device.command.cancel");
        let err = registry.validate_message(&document).unwrap_err();
        assert_eq!(err.path, "/envelope/type");
        assert_eq!(err.constraint, Constraint::Enum);
    }

    #[test]
    fn test_type_schema_runs_second() {
        let registry = SchemaRegistry::bundled().unwrap();
        let mut document = heartbeat();
        document["payload"]["wifi_rssi"] = json!(5);
        assert!(registry.envelope().is_valid(&document));
        let err = registry.validate_message(&document).unwrap_err();
        assert_eq!(err.path, "/payload/wifi_rssi");
        assert_eq!(err.constraint, Constraint::Maximum);
    }

    #[test]
    fn test_error_schema() {
        let registry = SchemaRegistry::bundled().unwrap();
        let schema = registry.error_schema();
        assert!(schema.is_valid(&json!({"code": "E_INTERNAL", "message": "boom"})));
        assert!(!schema.is_valid(&json!({"code": "E_INTERNAL", "message": ""})));
        assert!(!schema.is_valid(&json!({"code": "E_BOOM", "message": "boom"})));
    }

    #[test]
    fn test_validate_all_merges_both_schemas() {
        let registry = SchemaRegistry::bundled().unwrap();
        let mut document = heartbeat();
        document["envelope"]["correlation_id"] = json!("550e8400-e29b-41d4-a716-446655440000");
        document["payload"]["wifi_rssi"] = json!(5);
        let errors = registry.validate_message_all(&document);
        // Envelope schema: correlation_id forbidden on heartbeats. Type
        // schema: same field is not declared, and rssi is out of range.
        assert!(errors.len() >= 3);
    }
}
