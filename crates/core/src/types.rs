//! Core types

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as whole seconds since the Unix epoch.
///
/// Clocks set before 1970 report 0 rather than failing.
pub fn unix_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Identifier rules shared by envelopes and configuration.
///
/// These mirror the `source` constraints of the envelope schema so a node can
/// reject a bad identity at startup instead of on its first message.
pub struct IdentityPatterns;

impl IdentityPatterns {
    /// Maximum length of a service or instance name.
    pub const MAX_NAME_LEN: usize = 64;

    /// `^[a-z][a-z0-9_]*$`, 1-64 chars.
    pub fn is_valid_service(service: &str) -> bool {
        let mut chars = service.chars();
        match chars.next() {
            Some(first) if first.is_ascii_lowercase() => {}
            _ => return false,
        }
        service.len() <= Self::MAX_NAME_LEN
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }

    /// `^[a-z0-9][a-z0-9_-]*$`, 1-64 chars.
    pub fn is_valid_instance(instance: &str) -> bool {
        let mut chars = instance.chars();
        match chars.next() {
            Some(first) if first.is_ascii_lowercase() || first.is_ascii_digit() => {}
            _ => return false,
        }
        instance.len() <= Self::MAX_NAME_LEN
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    }

    /// Strict `MAJOR.MINOR.PATCH`.
    pub fn is_valid_version(version: &str) -> bool {
        let parts: Vec<&str> = version.split('.').collect();
        parts.len() == 3
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    }
}
