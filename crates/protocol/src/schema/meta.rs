//! Meta-validation of schema documents.
//!
//! A schema document is acceptable when it is an instance of the embedded
//! draft-07 subset meta-schema, all of its patterns compile and all of its
//! references resolve. The meta-schema is checked with the same engine that
//! validates messages.

use super::validator::CompiledSchema;
use super::SchemaError;
use serde_json::Value;

/// The `$schema` URI every top-level document must declare.
pub const DRAFT_07_URI: &str = "http://json-schema.org/draft-07/schema#";

/// The embedded meta-schema source.
pub const META_SCHEMA: &str = include_str!("../../schemas/meta/draft-07-subset.json");

fn meta_schema() -> Result<CompiledSchema, SchemaError> {
    let document: Value = serde_json::from_str(META_SCHEMA).map_err(|source| SchemaError::Json {
        name: "draft-07-subset.json".to_string(),
        source,
    })?;
    CompiledSchema::compile(document)
}

/// Check any schema (or subschema) against the meta-schema and compile it.
pub fn check_schema(schema: &Value) -> Result<CompiledSchema, SchemaError> {
    meta_schema()?
        .validate(schema)
        .map_err(SchemaError::MetaSchema)?;
    CompiledSchema::compile(schema.clone())
}

/// [`check_schema`] plus the requirements on a top-level document:
/// draft-07 `$schema`, a `title` and a `type`.
pub fn check_document(document: &Value) -> Result<CompiledSchema, SchemaError> {
    let compiled = check_schema(document)?;
    match document.get("$schema").and_then(Value::as_str) {
        None => return Err(SchemaError::MissingKeyword("$schema")),
        Some(uri) if uri.trim_end_matches('#') != DRAFT_07_URI.trim_end_matches('#') => {
            return Err(SchemaError::UnsupportedDialect(uri.to_string()))
        }
        Some(_) => {}
    }
    if document.get("title").and_then(Value::as_str).is_none() {
        return Err(SchemaError::MissingKeyword("title"));
    }
    if document.get("type").is_none() {
        return Err(SchemaError::MissingKeyword("type"));
    }
    Ok(compiled)
}
