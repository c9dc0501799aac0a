//! Core functionality for the Arturo station bus.
//!
//! This crate provides the ambient pieces shared by every other crate in the
//! workspace: configuration loading, the core error type, logging
//! initialization, and small time/identity helpers.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    BusBackend, BusConfig, Config, ControllerConfig, IdentityConfig, LogFormat, LoggingConfig,
    SchemaConfig, StationConfig,
};
pub use error::{CoreError, Result};
pub use types::{unix_timestamp_secs, IdentityPatterns};
