//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration (durable queue and shared rate-limit counters).
    pub redis: RedisConfig,
    /// SMTP transport. When absent, outgoing mail is only logged.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    /// Sending limits.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Dispatch queue settings.
    #[serde(default)]
    pub queue: QueueSettings,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    /// How long the startup connection probe may take, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl RedisConfig {
    /// Startup connection probe timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// SMTP transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// SMTP relay host.
    pub host: String,
    /// SMTP port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Username for SMTP AUTH.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for SMTP AUTH.
    #[serde(default)]
    pub password: Option<String>,
    /// Upgrade the connection with STARTTLS.
    #[serde(default = "default_true")]
    pub starttls: bool,
}

/// Per-sender sending limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum number of emails a sender may send per calendar hour.
    #[serde(default = "default_max_emails_per_hour")]
    pub max_emails_per_hour: u64,
    /// Minimum spacing between two successful sends of one sender.
    #[serde(default = "default_min_delay_between_sends_ms")]
    pub min_delay_between_sends_ms: u64,
    /// Count sends in process memory when Redis is unreachable instead of
    /// running without a limit.
    #[serde(default)]
    pub local_counters: bool,
}

impl RateLimitSettings {
    /// Minimum spacing between sends as a [`Duration`].
    #[must_use]
    pub const fn min_delay_between_sends(&self) -> Duration {
        Duration::from_millis(self.min_delay_between_sends_ms)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_emails_per_hour: default_max_emails_per_hour(),
            min_delay_between_sends_ms: default_min_delay_between_sends_ms(),
            local_counters: false,
        }
    }
}

/// Dispatch queue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Number of durable workers processing jobs in parallel.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// Re-queue PENDING jobs from the store when the in-process scheduler starts.
    #[serde(default = "default_true")]
    pub recover_pending: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            recover_pending: true,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3001
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

fn default_redis_prefix() -> String {
    "mailsched".to_string()
}

const fn default_connect_timeout_ms() -> u64 {
    3000
}

const fn default_smtp_port() -> u16 {
    587
}

const fn default_max_emails_per_hour() -> u64 {
    100
}

const fn default_min_delay_between_sends_ms() -> u64 {
    1000
}

const fn default_worker_concurrency() -> usize {
    5
}

const fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (exported into the process environment, if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `MAILSCHED_ENV`)
    /// 4. Environment variables with `MAILSCHED__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("MAILSCHED_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("MAILSCHED")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("MAILSCHED")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
