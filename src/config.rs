use std::time::Duration;

use thiserror::Error;

use crate::poller::PollerConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name}={value:?} is not a positive integer")]
    NotPositive { name: &'static str, value: String },
}

/// Settings of the loyalty backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub run_address: String,
    pub database_uri: String,
    pub accrual_address: String,
    /// Number of poller workers.
    pub workers: usize,
    pub poll_interval: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            run_address: or_default(&lookup, "RUN_ADDRESS", "localhost:8080"),
            database_uri: lookup("DATABASE_URI")
                .filter(|uri| !uri.is_empty())
                .ok_or(ConfigError::Missing("DATABASE_URI"))?,
            accrual_address: or_default(&lookup, "ACCRUAL_SYSTEM_ADDRESS", "http://localhost:8081"),
            workers: positive(&lookup, "RATE_LIMIT", 10)? as usize,
            poll_interval: Duration::from_millis(positive(&lookup, "POLL_INTERVAL_MS", 1000)?),
        })
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            workers: self.workers,
            poll_interval: self.poll_interval,
            ..PollerConfig::default()
        }
    }
}

/// Settings of the accrual service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccrualSettings {
    pub run_address: String,
    /// Distinct orders answered per window.
    pub rate_limit: usize,
    pub rate_window: Duration,
}

impl AccrualSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            run_address: or_default(&lookup, "RUN_ADDRESS", "localhost:8081"),
            rate_limit: positive(&lookup, "RATE_LIMIT", 10)? as usize,
            rate_window: Duration::from_secs(positive(&lookup, "RATE_WINDOW_SECS", 60)?),
        })
    }
}

fn or_default(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match lookup(name).filter(|value| !value.is_empty()) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(parsed) if parsed > 0 => Ok(parsed),
            _ => Err(ConfigError::NotPositive { name, value }),
        },
    }
}
