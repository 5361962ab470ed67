//! Application configuration.
//!
//! Aggregates the storage, cache, outbox and summary settings into a single
//! Config struct that can be loaded from YAML files or environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::projection::DEFAULT_SUMMARY_TTL;
use crate::sync::OutboxConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "STOREFRONT_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "STOREFRONT";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "STOREFRONT_LOG";

/// Source-of-truth database settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite URL, e.g. `sqlite://storefront.db` or `sqlite::memory:`.
    pub url: String,
    /// Pool size. In-memory databases always use a single connection.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://storefront.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Projection cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Product summary settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Lifetime of a cached product summary in seconds. Default: 3600.
    pub ttl_secs: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SUMMARY_TTL.as_secs(),
        }
    }
}

impl SummaryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source-of-truth database.
    pub storage: StorageConfig,
    /// Projection cache.
    pub cache: CacheConfig,
    /// Outbox recovery.
    pub outbox: OutboxConfig,
    /// Product summaries.
    pub summary: SummaryConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, nested with `__`
    ///    (e.g. `STOREFRONT__OUTBOX__MAX_RETRIES=3`)
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Create config for testing: in-memory SQLite and an outbox that
    /// recovers entries immediately.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            outbox: OutboxConfig {
                min_age_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests;
