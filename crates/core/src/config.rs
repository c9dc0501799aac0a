//! Configuration management for Arturo nodes.
//!
//! A node reads a single TOML file. Every section has defaults so a minimal
//! file only needs the `[identity]` table, and the whole file may be omitted
//! during development (`Config::default_config`).

use crate::error::{CoreError, Result};
use crate::types::IdentityPatterns;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub identity: IdentityConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub schemas: SchemaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity stamped into every envelope `source` this node produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub service: String,
    pub instance: String,
    #[serde(default = "default_version")]
    pub version: String,
}

/// Which substrate carries streams, keys and channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-process substrate; only useful for tests and single-process demos.
    #[default]
    Memory,
    /// Redis 6+ (streams, consumer groups, pub/sub, key expiry).
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub backend: BusBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_presence_ttl_secs")]
    pub presence_ttl_secs: u64,
    #[serde(default = "default_presence_namespace")]
    pub presence_namespace: String,
    #[serde(default = "default_consumer_block_ms")]
    pub consumer_block_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Devices the loopback handler answers for.
    #[serde(default)]
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_command_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_reply_block_ms")]
    pub reply_block_ms: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Load schema documents from this directory instead of the bundled set.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_presence_ttl_secs() -> u64 {
    90
}

fn default_presence_namespace() -> String {
    "device".to_string()
}

fn default_consumer_block_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    16
}

fn default_command_timeout_ms() -> u64 {
    5000
}

fn default_reply_block_ms() -> u64 {
    500
}

fn default_stale_after_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::default(),
            redis_url: default_redis_url(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            presence_ttl_secs: default_presence_ttl_secs(),
            presence_namespace: default_presence_namespace(),
            consumer_block_ms: default_consumer_block_ms(),
            batch_size: default_batch_size(),
            devices: Vec::new(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_command_timeout_ms(),
            reply_block_ms: default_reply_block_ms(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl StationConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn consumer_block(&self) -> Duration {
        Duration::from_millis(self.consumer_block_ms)
    }
}

impl ControllerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn reply_block(&self) -> Duration {
        Duration::from_millis(self.reply_block_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Config {
    /// Load and validate a TOML configuration file, then apply environment
    /// overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            identity: IdentityConfig {
                service: "controller".to_string(),
                instance: "ctrl-01".to_string(),
                version: default_version(),
            },
            bus: BusConfig::default(),
            station: StationConfig::default(),
            controller: ControllerConfig::default(),
            schemas: SchemaConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Honor `ARTURO_REDIS_URL`, `ARTURO_INSTANCE` and `ARTURO_LOG_LEVEL`.
    ///
    /// Setting `ARTURO_REDIS_URL` also switches the backend to Redis.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ARTURO_REDIS_URL") {
            self.bus.redis_url = url;
            self.bus.backend = BusBackend::Redis;
        }
        if let Ok(instance) = std::env::var("ARTURO_INSTANCE") {
            self.identity.instance = instance;
        }
        if let Ok(level) = std::env::var("ARTURO_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Reject identities the envelope schema would reject and timing
    /// combinations that would make a healthy station look dead.
    pub fn validate(&self) -> Result<()> {
        if !IdentityPatterns::is_valid_service(&self.identity.service) {
            return Err(CoreError::Config(format!(
                "identity.service {:?} must match ^[a-z][a-z0-9_]*$ (1-64 chars)",
                self.identity.service
            )));
        }
        if !IdentityPatterns::is_valid_instance(&self.identity.instance) {
            return Err(CoreError::Config(format!(
                "identity.instance {:?} must match ^[a-z0-9][a-z0-9_-]*$ (1-64 chars)",
                self.identity.instance
            )));
        }
        if !IdentityPatterns::is_valid_version(&self.identity.version) {
            return Err(CoreError::Config(format!(
                "identity.version {:?} must be MAJOR.MINOR.PATCH",
                self.identity.version
            )));
        }
        if self.station.heartbeat_interval_secs == 0 {
            return Err(CoreError::Config(
                "station.heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        if self.station.presence_ttl_secs <= self.station.heartbeat_interval_secs {
            return Err(CoreError::Config(format!(
                "station.presence_ttl_secs ({}) must exceed heartbeat_interval_secs ({})",
                self.station.presence_ttl_secs, self.station.heartbeat_interval_secs
            )));
        }
        if self.station.batch_size == 0 {
            return Err(CoreError::Config("station.batch_size must be positive".to_string()));
        }
        if !(100..=300_000).contains(&self.controller.default_timeout_ms) {
            return Err(CoreError::Config(format!(
                "controller.default_timeout_ms ({}) must be within 100..=300000",
                self.controller.default_timeout_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [identity]
            service = "esp32_tcp_bridge"
            instance = "station-01"
            "#,
        )
        .unwrap();

        assert_eq!(config.identity.version, "1.0.0");
        assert_eq!(config.bus.backend, BusBackend::Memory);
        assert_eq!(config.station.presence_ttl_secs, 90);
        assert_eq!(config.station.presence_namespace, "device");
        assert_eq!(config.controller.default_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml_str(
            r#"
            [identity]
            service = "controller"
            instance = "ctrl-02"
            version = "2.1.0"

            [bus]
            backend = "redis"
            redis_url = "redis://broker:6379"

            [station]
            heartbeat_interval_secs = 10
            presence_ttl_secs = 30
            devices = ["fluke-8846a"]

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.bus.backend, BusBackend::Redis);
        assert_eq!(config.station.devices, vec!["fluke-8846a".to_string()]);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_service_name() {
        let mut config = Config::default_config();
        config.identity.service = "MyService".to_string();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_rejects_ttl_not_exceeding_heartbeat() {
        let mut config = Config::default_config();
        config.station.heartbeat_interval_secs = 30;
        config.station.presence_ttl_secs = 30;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        let mut config = Config::default_config();
        config.controller.default_timeout_ms = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let result = Config::from_toml_str("[identity\nservice=");
        assert!(matches!(result, Err(CoreError::ConfigParse(_))));
    }
}
