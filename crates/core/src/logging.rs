//! Structured logging infrastructure for Arturo.
//!
//! One entry point installs the global subscriber from the `[logging]`
//! section: human-readable lines for the bench, JSON for log aggregation.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` directives when present and non-empty, else `default_level`.
fn build_filter(env: Option<String>, default_level: &str) -> EnvFilter {
    match env {
        Some(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(default_level),
    }
}

/// Initialize from the `[logging]` section. `RUST_LOG` still wins when set.
///
/// Returns `false` if a global subscriber was already installed.
///
/// # Example
/// ```no_run
/// use arturo_core::config::LoggingConfig;
/// use arturo_core::logging;
///
/// logging::init_from_config(&LoggingConfig::default());
/// tracing::info!(station = "station-01", "Station started");
/// ```
pub fn init_from_config(config: &LoggingConfig) -> bool {
    let filter = build_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok(), &config.level);
    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init(),
    };
    result.is_ok()
}
