//! Environment-driven configuration for the listener binary.

use std::env;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_CHANNEL: &str = "transfers";
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SUBSCRIBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Settings derived from `.env`/process variables. Only the notification
/// database URL is mandatory; everything else has a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    database_url: String,
    channel: String,
    store_database_url: Option<String>,
    backoff_base: Duration,
    backoff_max: Duration,
    connect_timeout: Duration,
    subscribe_timeout: Duration,
    shutdown_timeout: Duration,
    queue_capacity: usize,
}

impl ListenerConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// process variables. Missing or malformed entries surface as
    /// `ConfigError` so the binary can respond gracefully.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let backoff_base = Duration::from_millis(get_number_var(
            "LISTENER_BACKOFF_BASE_MS",
            DEFAULT_BACKOFF_BASE_MS,
        )?);
        let backoff_max = Duration::from_millis(get_number_var(
            "LISTENER_BACKOFF_MAX_MS",
            DEFAULT_BACKOFF_MAX_MS,
        )?)
        .max(backoff_base);

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            channel: get_optional_var("LISTENER_CHANNEL")
                .unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
            store_database_url: get_optional_var("STORE_DATABASE_URL"),
            backoff_base,
            backoff_max,
            connect_timeout: Duration::from_secs(get_number_var(
                "LISTENER_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
            subscribe_timeout: Duration::from_secs(get_number_var(
                "LISTENER_SUBSCRIBE_TIMEOUT_SECS",
                DEFAULT_SUBSCRIBE_TIMEOUT_SECS,
            )?),
            shutdown_timeout: Duration::from_secs(get_number_var(
                "LISTENER_SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )?),
            queue_capacity: get_number_var("LISTENER_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?
                .max(1),
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Database used to persist classified transfers, if any.
    pub fn store_database_url(&self) -> Option<&str> {
        self.store_database_url.as_deref()
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn subscribe_timeout(&self) -> Duration {
        self.subscribe_timeout
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or(ConfigError::MissingVar { key })
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn get_number_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    match get_optional_var(key) {
        Some(value) => value
            .parse()
            .map_err(|source| ConfigError::InvalidNumber { key, source }),
        None => Ok(default),
    }
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("TRANSFER_FEED_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
