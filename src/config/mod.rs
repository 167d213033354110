//! Configuration management for the harvester
//!
//! Configuration comes from environment variables or a TOML file and is
//! validated before any worker starts. Every timing value the scheduler relies
//! on lives in [`SchedulerConfig`].

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// PostgreSQL task/session store
    pub database: DatabaseConfig,

    /// Redis coordination store
    pub redis: RedisConfig,

    /// Scheduler timing and limits
    pub scheduler: SchedulerConfig,

    /// Remote fetch bridge
    pub fetcher: FetcherConfig,

    /// Prometheus endpoint
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: String,

    /// Maximum pool size
    pub pool_size: usize,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,
}

/// Per-family batch sizes for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyLimits {
    pub process_limit: usize,
    pub flush_limit: usize,
}

/// Scheduler timing and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Per-task lock lease
    pub lock_ttl_secs: u64,

    /// Minimum time between two remote calls for the same task
    pub min_poll_interval_secs: u64,

    /// How long a low-yield member waits before its score is refreshed anyway
    pub stall_timeout_ms: u64,

    /// Cooldown applied to a session after a rate-limit response
    pub rate_limit_cooldown_secs: u64,

    /// Storage node sessions are selected from
    pub storage_node: i32,

    /// Namespace for coordination keys
    pub key_prefix: String,

    pub posts: FamilyLimits,
    pub replies: FamilyLimits,
    pub user_posts: FamilyLimits,

    /// Cron tick period
    pub tick_interval_secs: u64,

    /// Session health check period
    pub session_check_interval_secs: u64,

    /// Daily replies seeding time (HH:MM, local time)
    pub seed_time: String,

    /// Posts considered per seeding run
    pub seed_limit: usize,
}

/// Remote fetch bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Fetch service endpoint
    pub endpoint: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// First local proxy port; session slot N egresses via base + N
    pub proxy_base_port: u16,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Listen address for `/metrics` and `/health`; disabled when unset
    pub addr: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let scheduler = &defaults.scheduler;

        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("POSTGRES_URL"))
            .unwrap_or(defaults.database.url.clone());

        let redis_url = std::env::var("REDIS_URL").unwrap_or(defaults.redis.url.clone());

        Ok(Self {
            database: DatabaseConfig {
                url: database_url,
                pool_size: env_or("HARVESTER_DB_POOL_SIZE", defaults.database.pool_size),
            },
            redis: RedisConfig {
                url: redis_url,
                pool_size: env_or("REDIS_POOL_SIZE", defaults.redis.pool_size),
            },
            scheduler: SchedulerConfig {
                lock_ttl_secs: env_or("HARVESTER_LOCK_TTL", scheduler.lock_ttl_secs),
                min_poll_interval_secs: env_or(
                    "HARVESTER_MIN_POLL_INTERVAL",
                    scheduler.min_poll_interval_secs,
                ),
                stall_timeout_ms: env_or("HARVESTER_STALL_TIMEOUT_MS", scheduler.stall_timeout_ms),
                rate_limit_cooldown_secs: env_or(
                    "HARVESTER_RATE_LIMIT_COOLDOWN",
                    scheduler.rate_limit_cooldown_secs,
                ),
                storage_node: env_or("HARVESTER_STORAGE_NODE", scheduler.storage_node),
                key_prefix: std::env::var("HARVESTER_KEY_PREFIX")
                    .unwrap_or(scheduler.key_prefix.clone()),
                tick_interval_secs: env_or("HARVESTER_TICK_INTERVAL", scheduler.tick_interval_secs),
                session_check_interval_secs: env_or(
                    "HARVESTER_SESSION_CHECK_INTERVAL",
                    scheduler.session_check_interval_secs,
                ),
                seed_time: std::env::var("HARVESTER_SEED_TIME")
                    .unwrap_or(scheduler.seed_time.clone()),
                ..scheduler.clone()
            },
            fetcher: FetcherConfig {
                endpoint: std::env::var("HARVESTER_FETCH_ENDPOINT")
                    .unwrap_or(defaults.fetcher.endpoint.clone()),
                timeout_secs: env_or("HARVESTER_FETCH_TIMEOUT", defaults.fetcher.timeout_secs),
                proxy_base_port: env_or(
                    "HARVESTER_PROXY_BASE_PORT",
                    defaults.fetcher.proxy_base_port,
                ),
            },
            metrics: MetricsConfig {
                addr: std::env::var("HARVESTER_METRICS_ADDR").ok(),
            },
            logging: LoggingConfig {
                level: std::env::var("HARVESTER_LOG_LEVEL")
                    .unwrap_or(defaults.logging.level.clone()),
                format: std::env::var("HARVESTER_LOG_FORMAT")
                    .unwrap_or(defaults.logging.format.clone()),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            anyhow::bail!("database.pool_size must be greater than 0");
        }

        if self.redis.pool_size == 0 {
            anyhow::bail!("redis.pool_size must be greater than 0");
        }

        let scheduler = &self.scheduler;
        if scheduler.lock_ttl_secs == 0 {
            anyhow::bail!("lock_ttl_secs must be greater than 0");
        }

        if scheduler.lock_ttl_secs <= self.fetcher.timeout_secs {
            anyhow::bail!(
                "lock_ttl_secs ({}) must be longer than the fetch timeout ({})",
                scheduler.lock_ttl_secs,
                self.fetcher.timeout_secs
            );
        }

        if scheduler.min_poll_interval_secs == 0 {
            anyhow::bail!("min_poll_interval_secs must be greater than 0");
        }

        if scheduler.tick_interval_secs == 0 || scheduler.session_check_interval_secs == 0 {
            anyhow::bail!("cron intervals must be greater than 0");
        }

        if scheduler.key_prefix.is_empty() {
            anyhow::bail!("key_prefix must not be empty");
        }

        scheduler.seed_time()?;

        Ok(())
    }

    /// Get fetch request timeout as Duration
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetcher.timeout_secs)
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    #[must_use]
    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_secs(self.min_poll_interval_secs)
    }

    #[must_use]
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    #[must_use]
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    #[must_use]
    pub fn session_check_interval(&self) -> Duration {
        Duration::from_secs(self.session_check_interval_secs)
    }

    /// Parse the daily seeding time
    pub fn seed_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.seed_time, "%H:%M")
            .with_context(|| format!("seed_time must be HH:MM, got '{}'", self.seed_time))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::from("postgresql://localhost/harvester"),
            pool_size: 10,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://localhost:6379"),
            pool_size: 10,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 30,
            min_poll_interval_secs: 30,
            stall_timeout_ms: 300_000,
            rate_limit_cooldown_secs: 900,
            storage_node: 1,
            key_prefix: String::from("harvester"),
            posts: FamilyLimits {
                process_limit: 5,
                flush_limit: 5,
            },
            replies: FamilyLimits {
                process_limit: 30,
                flush_limit: 30,
            },
            user_posts: FamilyLimits {
                process_limit: 30,
                flush_limit: 30,
            },
            tick_interval_secs: 30,
            session_check_interval_secs: 900,
            seed_time: String::from("23:30"),
            seed_limit: 1000,
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("http://127.0.0.1:8700/fetch"),
            timeout_secs: 20,
            proxy_base_port: 2080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}
