//! Canonical example messages shipped next to the schemas.

use super::registry::SchemaRegistry;
use super::SchemaError;
use crate::message_type::MessageType;
use serde_json::Value;
use std::path::Path;

/// One example document and the type directory it was filed under.
#[derive(Debug, Clone)]
pub struct Example {
    pub message_type: MessageType,
    pub name: String,
    pub document: Value,
}

impl Example {
    /// Check the example against the registry: its `envelope.type` must
    /// match its directory and it must pass both message schemas.
    pub fn verify(&self, registry: &SchemaRegistry) -> Result<(), SchemaError> {
        let found = self
            .document
            .pointer("/envelope/type")
            .and_then(Value::as_str)
            .unwrap_or("<missing>");
        if found != self.message_type.as_str() {
            return Err(SchemaError::ExampleTypeMismatch {
                name: self.name.clone(),
                expected: self.message_type,
                found: found.to_string(),
            });
        }
        registry
            .validate_message(&self.document)
            .map_err(|source| SchemaError::ExampleInvalid {
                name: self.name.clone(),
                source,
            })
    }
}

const BUNDLED: &[(MessageType, &str, &str)] = &[
    (
        MessageType::DeviceCommandRequest,
        "device-command-request/examples/measure_voltage.json",
        include_str!("../../schemas/v1.0.0/device-command-request/examples/measure_voltage.json"),
    ),
    (
        MessageType::DeviceCommandRequest,
        "device-command-request/examples/identify.json",
        include_str!("../../schemas/v1.0.0/device-command-request/examples/identify.json"),
    ),
    (
        MessageType::DeviceCommandResponse,
        "device-command-response/examples/measure_voltage_success.json",
        include_str!(
            "../../schemas/v1.0.0/device-command-response/examples/measure_voltage_success.json"
        ),
    ),
    (
        MessageType::DeviceCommandResponse,
        "device-command-response/examples/device_timeout.json",
        include_str!("../../schemas/v1.0.0/device-command-response/examples/device_timeout.json"),
    ),
    (
        MessageType::ServiceHeartbeat,
        "service-heartbeat/examples/running.json",
        include_str!("../../schemas/v1.0.0/service-heartbeat/examples/running.json"),
    ),
    (
        MessageType::ServiceHeartbeat,
        "service-heartbeat/examples/degraded.json",
        include_str!("../../schemas/v1.0.0/service-heartbeat/examples/degraded.json"),
    ),
    (
        MessageType::SystemEmergencyStop,
        "system-emergency-stop/examples/button_press.json",
        include_str!("../../schemas/v1.0.0/system-emergency-stop/examples/button_press.json"),
    ),
    (
        MessageType::SystemOtaRequest,
        "system-ota-request/examples/firmware_update.json",
        include_str!("../../schemas/v1.0.0/system-ota-request/examples/firmware_update.json"),
    ),
];

fn parse(name: &str, source: &str) -> Result<Value, SchemaError> {
    serde_json::from_str(source).map_err(|source| SchemaError::Json {
        name: name.to_string(),
        source,
    })
}

/// The examples compiled into this crate.
pub fn bundled_examples() -> Result<Vec<Example>, SchemaError> {
    BUNDLED
        .iter()
        .map(|(message_type, name, source)| {
            Ok(Example {
                message_type: *message_type,
                name: name.to_string(),
                document: parse(name, source)?,
            })
        })
        .collect()
}

/// Read `<dir>/<type-dir>/examples/*.json` for every message type.
///
/// A type without an examples directory contributes nothing.
pub fn load_examples(dir: &Path) -> Result<Vec<Example>, SchemaError> {
    let mut examples = Vec::new();
    for message_type in MessageType::ALL {
        let examples_dir = dir.join(message_type.schema_name()).join("examples");
        if !examples_dir.is_dir() {
            continue;
        }
        let entries = std::fs::read_dir(&examples_dir).map_err(|source| SchemaError::Io {
            path: examples_dir.clone(),
            source,
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SchemaError::Io {
                path: examples_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        for path in paths {
            let text = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io {
                path: path.clone(),
                source,
            })?;
            let name = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .display()
                .to_string();
            examples.push(Example {
                message_type,
                document: parse(&name, &text)?,
                name,
            });
        }
    }
    Ok(examples)
}
