//! JSON Schema support: the validator engine, the meta-schema check, and the
//! registry of bundled message schemas.

pub mod corpus;
pub mod meta;
pub mod registry;
pub mod validator;

pub use corpus::{bundled_examples, load_examples, Example};
pub use meta::{check_document, check_schema, DRAFT_07_URI};
pub use registry::SchemaRegistry;
pub use validator::{CompiledSchema, Constraint, ValidationError};

use crate::message_type::MessageType;
use std::path::PathBuf;
use thiserror::Error;

/// Problems with schema documents themselves, as opposed to the data they
/// validate.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid pattern {pattern:?} at {location}: {source}")]
    InvalidPattern {
        location: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unresolved $ref {reference:?} at {location}")]
    UnresolvedRef { location: String, reference: String },

    #[error("schema violates the draft-07 subset meta-schema: {0}")]
    MetaSchema(ValidationError),

    #[error("schema document is missing top-level {0:?}")]
    MissingKeyword(&'static str),

    #[error("unsupported $schema {0:?}, expected draft-07")]
    UnsupportedDialect(String),

    #[error("{name} is not valid JSON: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{name}: {source}")]
    Document {
        name: String,
        #[source]
        source: Box<SchemaError>,
    },

    #[error("example {name} has type {found}, expected {expected}")]
    ExampleTypeMismatch {
        name: String,
        expected: MessageType,
        found: String,
    },

    #[error("example {name} fails validation: {source}")]
    ExampleInvalid {
        name: String,
        #[source]
        source: ValidationError,
    },
}

impl SchemaError {
    /// Attach the document name to an error raised while checking it.
    pub fn in_document(self, name: impl Into<String>) -> Self {
        SchemaError::Document {
            name: name.into(),
            source: Box::new(self),
        }
    }
}
