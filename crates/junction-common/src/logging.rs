//! Logging configuration and initialization.
//!
//! Use the structured macros (`info!`, `warn!`, `error!`) everywhere; the
//! subscriber is installed once at process start. Filtering follows
//! `RUST_LOG` when set, otherwise the configured default directives.

use anyhow::Result;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter directives, e.g. `"junction_server=debug,info"`.
    #[serde(default = "default_directives")]
    pub directives: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_directives() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directives: default_directives(),
            format: LogFormat::Text,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Safe to call only once per process; returns an error if a subscriber is
/// already set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives.clone()));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
        },
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
        },
    }
    Ok(())
}
