use serde::{Deserialize, Serialize};

/// Main configuration structure for roadwarden.
///
/// The flat fields mirror the deployment's environment surface
/// (`ENVIRONMENT`, `BLACKROAD_ORG`, `SCRAPE_INTERVAL_MINUTES`,
/// `SELF_HEAL_ENABLED`, `MAX_RETRY_ATTEMPTS`, `GITHUB_TOKEN`); the nested
/// sections configure the service's own machinery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Deployment environment label (free string)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Code-host organization the known repos live under
    #[serde(default = "default_blackroad_org")]
    pub blackroad_org: String,

    /// Cadence of the incremental scrape loop
    #[serde(default = "default_scrape_interval_minutes")]
    pub scrape_interval_minutes: u64,

    /// When false, healing tasks are immediately escalated
    #[serde(default = "default_self_heal_enabled")]
    pub self_heal_enabled: bool,

    /// Default retry ceiling applied to new jobs
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Token forwarded to the code-host scraper
    #[serde(default)]
    pub github_token: Option<String>,

    /// Repository short-names the sync engine tracks from the start.
    /// Configuration, not data: the tracked set may grow via updates but
    /// never shrink.
    #[serde(default)]
    pub known_repos: Vec<String>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub scraper: ScraperConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_blackroad_org() -> String {
    "BlackRoad-OS".to_string()
}

const fn default_scrape_interval_minutes() -> u64 {
    30
}

const fn default_self_heal_enabled() -> bool {
    true
}

const fn default_max_retry_attempts() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            blackroad_org: default_blackroad_org(),
            scrape_interval_minutes: default_scrape_interval_minutes(),
            self_heal_enabled: default_self_heal_enabled(),
            max_retry_attempts: default_max_retry_attempts(),
            github_token: None,
            known_repos: vec![],
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            queue: QueueConfig::default(),
            scraper: ScraperConfig::default(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".roadwarden/roadwarden.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8787
}

const fn default_enable_cors() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: default_enable_cors(),
        }
    }
}

/// Queue consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Messages pulled per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Poll interval between empty pulls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lease duration before an unacked message becomes visible again,
    /// in seconds
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,
}

const fn default_batch_size() -> usize {
    10
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_lease_seconds() -> i64 {
    120
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_seconds: default_lease_seconds(),
        }
    }
}

/// Code-host scraper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScraperConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Fallback API base probed by the switch_endpoint strategy
    #[serde(default = "default_backup_api_base")]
    pub backup_api_base: String,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_backup_api_base() -> String {
    "https://api.github.com".to_string()
}

const fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            backup_api_base: default_backup_api_base(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}
