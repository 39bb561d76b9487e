//! Startup configuration
//!
//! Read once from the environment and passed explicitly to construction.
//! A missing queue destination or store table is fatal at startup.

use std::time::Duration;
use thiserror::Error;

use crate::queue::DEFAULT_DEDUP_WINDOW;

/// Queue destination (Redis stream key). Required.
pub const ENV_QUEUE_STREAM: &str = "RELAY_QUEUE_STREAM";

/// Dedup store table identity (Redis key prefix). Required.
pub const ENV_DEDUP_TABLE: &str = "RELAY_DEDUP_TABLE";

pub const ENV_BIND_ADDR: &str = "RELAY_BIND_ADDR";
pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_DEDUP_WINDOW_SECS: &str = "RELAY_DEDUP_WINDOW_SECS";
pub const ENV_DEDUP_MODE: &str = "RELAY_DEDUP_MODE";

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Errors that can occur while loading configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// How the dedup store enforces single-writer recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Atomic create-if-absent in the store
    Conditional,
    /// Per-id lock over plain reads and writes; single process only
    Locked,
}

/// Relay service configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Server bind address
    pub bind_addr: String,
    /// Redis connection URL
    pub redis_url: String,
    /// Queue destination
    pub queue_stream: String,
    /// Dedup store table identity
    pub dedup_table: String,
    /// Queue dedup window
    pub dedup_window: Duration,
    pub dedup_mode: DedupMode,
}

impl RelayConfig {
    /// Create a config with defaults for everything but the required settings
    pub fn new(queue_stream: impl Into<String>, dedup_table: impl Into<String>) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            queue_stream: queue_stream.into(),
            dedup_table: dedup_table.into(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
            dedup_mode: DedupMode::Conditional,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let mut config = Self::new(required(ENV_QUEUE_STREAM)?, required(ENV_DEDUP_TABLE)?);

        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            config.bind_addr = addr;
        }
        if let Some(url) = lookup(ENV_REDIS_URL) {
            config.redis_url = url;
        }
        if let Some(secs) = lookup(ENV_DEDUP_WINDOW_SECS) {
            config.dedup_window = parse_window(&secs)?;
        }
        if let Some(mode) = lookup(ENV_DEDUP_MODE) {
            config.dedup_mode = parse_mode(&mode)?;
        }

        Ok(config)
    }
}

fn parse_window(value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid {
            name: ENV_DEDUP_WINDOW_SECS,
            value: value.to_string(),
        }),
    }
}

fn parse_mode(value: &str) -> Result<DedupMode, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "conditional" => Ok(DedupMode::Conditional),
        "locked" => Ok(DedupMode::Locked),
        _ => Err(ConfigError::Invalid {
            name: ENV_DEDUP_MODE,
            value: value.to_string(),
        }),
    }
}
