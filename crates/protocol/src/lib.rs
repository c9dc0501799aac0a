//! Arturo message protocol.
//!
//! Every message on the bus is a JSON object with exactly two members,
//! `envelope` and `payload`. This crate owns:
//! - the bundled `v1.0.0` schema documents and the validator that enforces them
//! - the typed envelope and payloads
//! - the codec that builds, validates, encodes and decodes messages
//! - the bus address conventions
//!
//! # Example
//!
//! ```no_run
//! use arturo_protocol::{build, BuildOptions, Codec, CommandRequestPayload, Source};
//! use uuid::Uuid;
//!
//! let codec = Codec::bundled().expect("bundled schemas");
//! let source = Source::new("controller", "ctrl-01", "1.0.0");
//! let request = build(
//!     &source,
//!     CommandRequestPayload::new("fluke-8846a", "measure_dc_voltage").with_timeout_ms(5000),
//!     BuildOptions::new()
//!         .correlation_id(Uuid::new_v4())
//!         .reply_to("responses:controller:ctrl-01"),
//! )
//! .expect("linkage present");
//! let wire = codec.encode(&request).expect("valid request");
//! assert_eq!(codec.decode(wire.as_bytes()).unwrap(), request);
//! ```

pub mod address;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod message;
pub mod message_type;
pub mod payload;
pub mod schema;

pub use codec::{build, parse_document, BuildOptions, Codec};
pub use envelope::{Envelope, Source, SCHEMA_VERSION};
pub use error::{ParseError, ProtocolError, Result};
pub use message::Message;
pub use message_type::{MessageType, UnknownMessageType};
pub use payload::{
    CommandRequestPayload, CommandResponsePayload, EmergencyStopPayload, ErrorCode, ErrorObject,
    EstopReason, HeartbeatPayload, HeartbeatStatus, OtaRequestPayload, Payload,
};
pub use schema::{CompiledSchema, Constraint, SchemaError, SchemaRegistry, ValidationError};
