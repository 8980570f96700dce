//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Deployment env names honored alongside the `ROADWARDEN_*` prefix. These
/// are the knobs the original deployment exposes, kept verbatim.
const DEPLOYMENT_ENV_KEYS: &[&str] = &[
    "ENVIRONMENT",
    "BLACKROAD_ORG",
    "SCRAPE_INTERVAL_MINUTES",
    "SELF_HEAL_ENABLED",
    "MAX_RETRY_ATTEMPTS",
    "GITHUB_TOKEN",
];

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid scrape interval: {0}. Must be at least 1 minute")]
    InvalidScrapeInterval(u64),

    #[error("Invalid batch_size: {0}. Must be at least 1")]
    InvalidBatchSize(usize),

    #[error("blackroad_org cannot be empty")]
    EmptyOrg,
}

/// The bare deployment variables, mapped onto the matching flat config
/// fields.
fn deployment_env() -> Env {
    Env::raw()
        .only(DEPLOYMENT_ENV_KEYS)
        .map(|key| key.as_str().to_lowercase().into())
}

/// Configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .roadwarden/config.yaml (project config)
    /// 3. .roadwarden/local.yaml (local overrides, optional)
    /// 4. ROADWARDEN_* environment variables
    /// 5. The bare deployment env names (ENVIRONMENT, BLACKROAD_ORG, ...)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".roadwarden/config.yaml"))
            .merge(Yaml::file(".roadwarden/local.yaml"))
            .merge(Env::prefixed("ROADWARDEN_").split("__"))
            .merge(deployment_env())
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(deployment_env())
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.blackroad_org.is_empty() {
            return Err(ConfigError::EmptyOrg);
        }

        if config.scrape_interval_minutes == 0 {
            return Err(ConfigError::InvalidScrapeInterval(
                config.scrape_interval_minutes,
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.queue.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(config.queue.batch_size));
        }

        Ok(())
    }
}
