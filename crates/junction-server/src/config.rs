//! Configuration management
//!
//! Settings load from a TOML file (path in `JUNCTION_CONFIG`, default
//! `config/junction.toml`), then a handful of environment variables
//! override the file for deploy-time knobs.

use junction_common::logging::LogConfig;
use junction_common::RetryPolicy;
use junction_core::router::{RoutingTarget, DEFAULT_TARGET};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://junction.db?mode=rwc";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub log: LogConfig,

    /// Tokens accepted in the `Api-Token` request header.
    pub api_tokens: Vec<String>,

    /// Unit abbreviation to collection display name.
    #[serde(default)]
    pub units: HashMap<String, String>,

    /// Downstream repository instances, keyed by routing name. Must contain
    /// a `default` entry.
    pub targets: HashMap<String, RoutingTarget>,
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Retry bounds for store and downstream calls, in config-friendly units.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Config {
    /// Load configuration from the TOML file, then apply environment
    /// overrides.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var("JUNCTION_CONFIG")
            .unwrap_or_else(|_| "config/junction.toml".to_string());
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("could not read config file '{path}': {e}"))?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("could not parse config file '{path}': {e}"))?;

        if let Ok(host) = std::env::var("JUNCTION_HOST") {
            config.server.host = host;
        }
        if let Some(port) = std::env::var("JUNCTION_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.server.port = port;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_tokens.is_empty() {
            anyhow::bail!("at least one api token must be configured");
        }
        if !self.targets.contains_key(DEFAULT_TARGET) {
            anyhow::bail!("targets must contain a '{DEFAULT_TARGET}' entry");
        }
        Ok(())
    }
}
