use crate::credentials::StaticCredentials;
use crate::streaming::buffer::HISTORY_CAPACITY;
use crate::streaming::endpoint::stream_url;
use crate::streaming::session::{SessionConfig, KEEPALIVE_INTERVAL, RECONNECT_DELAY};
use std::env;
use std::sync::Arc;
use std::time::Duration;

pub const URL_VAR: &str = "PERFWATCH_URL";
pub const TOKEN_VAR: &str = "PERFWATCH_TOKEN";
pub const RECONNECT_DELAY_VAR: &str = "PERFWATCH_RECONNECT_DELAY_MS";
pub const KEEPALIVE_INTERVAL_VAR: &str = "PERFWATCH_KEEPALIVE_INTERVAL_MS";
pub const HISTORY_CAPACITY_VAR: &str = "PERFWATCH_HISTORY_CAPACITY";

/// Client configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Dashboard origin, e.g. `https://perf.example.com`
    pub url: String,
    /// Login token; required before the stream can connect
    pub token: Option<String>,
    /// Delay before a lost stream is retried
    pub reconnect_delay: Duration,
    /// Interval between keepalive pings
    pub keepalive_interval: Duration,
    /// Samples kept for the live charts
    pub history_capacity: usize,
}

impl ClientConfig {
    /// Load configuration from environment variables (and `.env`, if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(URL_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(URL_VAR.to_string()))?;

        let config = Self {
            url,
            token: lookup(TOKEN_VAR).filter(|v| !v.is_empty()),
            reconnect_delay: parse_millis(&lookup, RECONNECT_DELAY_VAR, RECONNECT_DELAY)?,
            keepalive_interval: parse_millis(&lookup, KEEPALIVE_INTERVAL_VAR, KEEPALIVE_INTERVAL)?,
            history_capacity: match lookup(HISTORY_CAPACITY_VAR) {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    ConfigError::InvalidValue(format!(
                        "{} must be a number, got {:?}",
                        HISTORY_CAPACITY_VAR, raw
                    ))
                })?,
                None => HISTORY_CAPACITY,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Configuration with defaults for everything but the origin
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            reconnect_delay: RECONNECT_DELAY,
            keepalive_interval: KEEPALIVE_INTERVAL,
            history_capacity: HISTORY_CAPACITY,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        stream_url(&self.url, "")
            .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", URL_VAR, e)))?;

        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero",
                KEEPALIVE_INTERVAL_VAR
            )));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero",
                HISTORY_CAPACITY_VAR
            )));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            origin: self.url.clone(),
            reconnect_delay: self.reconnect_delay,
            keepalive_interval: self.keepalive_interval,
            history_capacity: self.history_capacity,
        }
    }

    pub fn credentials(&self) -> Arc<StaticCredentials> {
        Arc::new(StaticCredentials::new(self.token.clone()))
    }
}

fn parse_millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| {
                ConfigError::InvalidValue(format!("{} must be milliseconds, got {:?}", key, raw))
            }),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
