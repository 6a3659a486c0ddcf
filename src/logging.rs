//! Logging setup
//!
//! One global `tracing` subscriber: an env filter (`RUST_LOG`, falling back to
//! `application.log_level`) in front of a fmt layer in the configured format.
//!
//! ```no_run
//! use rover_canary::{config::CanaryConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CanaryConfig::load()?;
//! logging::init_from_config(&config)?;
//! # Ok(())
//! # }
//! ```

use crate::config::CanaryConfig;
use crate::error::{AppResult, CanaryError};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured
    Pretty,
    /// One line per event, no colours (scheduled runs)
    #[default]
    Compact,
    /// JSON objects for log aggregation
    Json,
}

fn env_filter(level: &str) -> AppResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| CanaryError::Configuration(format!("log level '{level}': {e}"))),
    }
}

fn fmt_layer(format: OutputFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        OutputFormat::Pretty => fmt::layer().pretty().boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_ansi(false).boxed(),
        OutputFormat::Json => fmt::layer().json().boxed(),
    }
}

/// Install the global subscriber described by `config.application`.
///
/// A subscriber that is already installed (a second call, a test harness) is
/// left in place.
pub fn init_from_config(config: &CanaryConfig) -> AppResult<()> {
    let app = &config.application;
    let filter = env_filter(&app.log_level)?;
    let _ = tracing_subscriber::registry()
        .with(fmt_layer(app.log_format))
        .with(filter)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_level_builds_filter() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(env_filter(level).is_ok(), "{level}");
        }
    }

    #[test]
    fn test_init_twice_is_ok() {
        let mut config = CanaryConfig::default();
        assert!(init_from_config(&config).is_ok());
        config.application.log_format = OutputFormat::Json;
        assert!(init_from_config(&config).is_ok());
    }
}
