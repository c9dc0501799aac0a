//! Conformance checks against the bundled schema documents.
//!
//! Positive cases come from the canonical examples; negative cases mutate a
//! canonical example in exactly one place and expect rejection.

use arturo_protocol::schema::{bundled_examples, Example};
use arturo_protocol::{Constraint, MessageType, SchemaRegistry};
use serde_json::{json, Value};
use std::path::Path;

fn registry() -> SchemaRegistry {
    SchemaRegistry::bundled().expect("bundled schemas compile")
}

fn example(message_type: MessageType) -> Value {
    bundled_examples()
        .unwrap()
        .into_iter()
        .find(|e: &Example| e.message_type == message_type)
        .map(|e| e.document)
        .unwrap()
}

fn rejects(registry: &SchemaRegistry, document: &Value) -> Constraint {
    registry
        .validate_message(document)
        .expect_err("document should be rejected")
        .constraint
}

#[test]
fn examples_pass_envelope_and_type_schema() {
    let registry = registry();
    for example in bundled_examples().unwrap() {
        assert!(
            registry.envelope().is_valid(&example.document),
            "{} fails envelope schema",
            example.name
        );
        assert!(
            registry
                .for_type(example.message_type)
                .unwrap()
                .is_valid(&example.document),
            "{} fails type schema",
            example.name
        );
    }
}

#[test]
fn example_type_matches_directory() {
    for example in bundled_examples().unwrap() {
        assert!(example.name.starts_with(example.message_type.schema_name()));
        assert_eq!(
            example.document["envelope"]["type"],
            json!(example.message_type.as_str())
        );
    }
}

#[test]
fn every_message_schema_closes_top_level() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas/v1.0.0");
    let mut files = vec!["envelope.schema.json".to_string()];
    files.extend(
        MessageType::ALL
            .iter()
            .map(|t| format!("{}.schema.json", t.schema_name())),
    );
    for file in files {
        let text = std::fs::read_to_string(dir.join(&file)).unwrap();
        let document: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            document["additionalProperties"],
            json!(false),
            "{} must set additionalProperties: false",
            file
        );
    }
}

#[test]
fn missing_core_fields_fail() {
    let registry = registry();
    let base = example(MessageType::ServiceHeartbeat);
    for field in ["id", "timestamp", "source", "type"] {
        let mut document = base.clone();
        document["envelope"].as_object_mut().unwrap().remove(field);
        assert_eq!(rejects(&registry, &document), Constraint::Required, "{}", field);
    }
    let mut document = base;
    document.as_object_mut().unwrap().remove("payload");
    assert_eq!(rejects(&registry, &document), Constraint::Required);
}

#[test]
fn request_without_linkage_fails() {
    let registry = registry();
    for message_type in [MessageType::DeviceCommandRequest, MessageType::SystemOtaRequest] {
        for field in ["correlation_id", "reply_to"] {
            let mut document = example(message_type);
            document["envelope"].as_object_mut().unwrap().remove(field);
            assert!(registry.validate_message(&document).is_err(), "{} {}", message_type, field);
        }
    }
}

#[test]
fn response_without_correlation_fails() {
    let registry = registry();
    let mut document = example(MessageType::DeviceCommandResponse);
    document["envelope"].as_object_mut().unwrap().remove("correlation_id");
    assert!(registry.validate_message(&document).is_err());
}

#[test]
fn broadcast_with_correlation_fails() {
    let registry = registry();
    for message_type in [MessageType::ServiceHeartbeat, MessageType::SystemEmergencyStop] {
        let mut document = example(message_type);
        document["envelope"]["correlation_id"] = json!("7c9e6679-7425-40de-944b-e07fc1f90ae7");
        assert!(registry.validate_message(&document).is_err());
    }
}

#[test]
fn command_timeout_below_minimum_fails() {
    let registry = registry();
    let mut document = example(MessageType::DeviceCommandRequest);
    document["payload"]["timeout_ms"] = json!(50);
    let err = registry.validate_message(&document).unwrap_err();
    assert_eq!(err.path, "/payload/timeout_ms");
    assert_eq!(err.constraint, Constraint::Minimum);

    document["payload"]["timeout_ms"] = json!(300_001);
    assert_eq!(rejects(&registry, &document), Constraint::Maximum);

    document["payload"]["timeout_ms"] = json!(100);
    assert!(registry.validate_message(&document).is_ok());
}

#[test]
fn heartbeat_rssi_bounds() {
    let registry = registry();
    let mut document = example(MessageType::ServiceHeartbeat);
    document["payload"]["wifi_rssi"] = json!(5);
    let err = registry.validate_message(&document).unwrap_err();
    assert_eq!(err.path, "/payload/wifi_rssi");

    document["payload"]["wifi_rssi"] = json!(-42);
    assert!(registry.validate_message(&document).is_ok());

    document["payload"]["wifi_rssi"] = json!(-128);
    assert!(registry.validate_message(&document).is_err());
}

#[test]
fn non_v4_uuid_fails() {
    let registry = registry();
    let mut document = example(MessageType::SystemEmergencyStop);
    // Version 1 UUID.
    document["envelope"]["id"] = json!("6ba7b810-9dad-11d1-80b4-00c04fd430c8");
    assert_eq!(rejects(&registry, &document), Constraint::Pattern);

    document["envelope"]["id"] = json!("9B2E4C3A-1D5F-4E6A-8B7C-0D1E2F3A4B5C");
    assert_eq!(rejects(&registry, &document), Constraint::Pattern);
}

#[test]
fn wrong_schema_version_fails() {
    let registry = registry();
    let mut document = example(MessageType::SystemEmergencyStop);
    document["envelope"]["schema_version"] = json!("v2.0.0");
    assert_eq!(rejects(&registry, &document), Constraint::Const);
}

#[test]
fn source_patterns_enforced() {
    let registry = registry();
    let cases = [
        ("service", json!("Controller")),
        ("service", json!("1controller")),
        ("instance", json!("-station")),
        ("instance", json!("a".repeat(65))),
        ("version", json!("1.0")),
    ];
    for (field, value) in cases {
        let mut document = example(MessageType::ServiceHeartbeat);
        document["envelope"]["source"][field] = value.clone();
        assert!(
            registry.validate_message(&document).is_err(),
            "{} = {}",
            field,
            value
        );
    }
}

#[test]
fn extra_fields_rejected_at_every_level() {
    let registry = registry();
    let pointers = ["", "/envelope", "/envelope/source", "/payload", "/payload/error"];
    for pointer in pointers {
        // Only the failing response example carries an error object.
        let mut document = if pointer == "/payload/error" {
            bundled_examples()
                .unwrap()
                .into_iter()
                .find(|e| e.name.ends_with("device_timeout.json"))
                .unwrap()
                .document
        } else {
            example(MessageType::DeviceCommandResponse)
        };
        document
            .pointer_mut(pointer)
            .unwrap()
            .as_object_mut()
            .unwrap()
            .insert("x_extra".to_string(), json!(1));
        assert_eq!(
            rejects(&registry, &document),
            Constraint::AdditionalProperties,
            "extra field under {:?}",
            pointer
        );
    }
}

#[test]
fn success_and_error_are_coupled() {
    let registry = registry();
    let mut document = example(MessageType::DeviceCommandResponse);
    assert_eq!(document["payload"]["success"], json!(true));

    document["payload"]["error"] = json!({"code": "E_INTERNAL", "message": "boom"});
    assert_eq!(rejects(&registry, &document), Constraint::Conditional);

    document["payload"]["success"] = json!(false);
    assert!(registry.validate_message(&document).is_ok());

    document["payload"].as_object_mut().unwrap().remove("error");
    assert_eq!(rejects(&registry, &document), Constraint::Conditional);
}

#[test]
fn error_object_constraints() {
    let registry = registry();
    let mut document = example(MessageType::DeviceCommandResponse);
    document["payload"]["success"] = json!(false);

    document["payload"]["error"] = json!({"code": "E_OOPS", "message": "boom"});
    assert!(registry.validate_message(&document).is_err());

    document["payload"]["error"] = json!({"code": "E_INTERNAL", "message": ""});
    assert!(registry.validate_message(&document).is_err());

    document["payload"]["error"] =
        json!({"code": "E_INTERNAL", "message": "boom", "details": {"register": 40001}});
    assert!(registry.validate_message(&document).is_ok());
}

#[test]
fn ota_constraints() {
    let registry = registry();
    let mut document = example(MessageType::SystemOtaRequest);
    document["payload"]["sha256"] = json!("abc123");
    assert_eq!(rejects(&registry, &document), Constraint::Pattern);

    let mut document = example(MessageType::SystemOtaRequest);
    document["payload"]["firmware_url"] = json!("ftp://fw.local/image.bin");
    assert_eq!(rejects(&registry, &document), Constraint::Pattern);

    let mut document = example(MessageType::SystemOtaRequest);
    document["payload"]["version"] = json!("1.1");
    assert!(registry.validate_message(&document).is_err());
}

#[test]
fn estop_constraints() {
    let registry = registry();
    let mut document = example(MessageType::SystemEmergencyStop);
    document["payload"]["reason"] = json!("bored");
    assert_eq!(rejects(&registry, &document), Constraint::Enum);

    let mut document = example(MessageType::SystemEmergencyStop);
    document["payload"]["description"] = json!("x".repeat(257));
    assert_eq!(rejects(&registry, &document), Constraint::MaxLength);
}

#[test]
fn payload_of_wrong_type_fails() {
    let registry = registry();
    let mut document = example(MessageType::ServiceHeartbeat);
    document["payload"] = example(MessageType::SystemEmergencyStop)["payload"].clone();
    assert!(registry.validate_message(&document).is_err());
}
