//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on malformed values. Every variable is
//! optional; unset ones fall back to defaults.

use std::time::Duration;

use tracing::Level;

use crate::engine::pool::default_max_concurrent;
use crate::engine::{ConveyerConfig, PoolConfig};
use crate::error::{Error, Result};
use crate::log::LogHub;
use crate::log::aggregator::DEFAULT_THRESHOLD;

#[derive(Debug, Clone)]
pub struct Config {
    /// Jobs allowed to execute at once (`CONVEYER_MAX_CONCURRENT`).
    pub max_concurrent: usize,
    /// Seconds `close` waits for running jobs (`CONVEYER_DRAIN_TIMEOUT`).
    pub drain_timeout: Option<Duration>,
    /// Minimum level reaching the conveyer log (`CONVEYER_LOG_THRESHOLD`).
    pub log_threshold: Level,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let max_concurrent = match optional_var("CONVEYER_MAX_CONCURRENT") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::Config(format!(
                        "CONVEYER_MAX_CONCURRENT must be a positive integer, got {raw:?}"
                    )));
                }
            },
            None => default_max_concurrent(),
        };

        let drain_timeout = optional_var("CONVEYER_DRAIN_TIMEOUT")
            .map(|raw| {
                raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                    Error::Config(format!(
                        "CONVEYER_DRAIN_TIMEOUT must be a number of seconds, got {raw:?}"
                    ))
                })
            })
            .transpose()?;

        let log_threshold = optional_var("CONVEYER_LOG_THRESHOLD")
            .map(|raw| {
                raw.parse::<Level>().map_err(|_| {
                    Error::Config(format!("CONVEYER_LOG_THRESHOLD is not a level: {raw:?}"))
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_THRESHOLD);

        Ok(Self {
            max_concurrent,
            drain_timeout,
            log_threshold,
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Conveyer settings, with the conveyer log attached to `hub`.
    pub fn conveyer_config(&self, hub: LogHub) -> ConveyerConfig {
        ConveyerConfig {
            pool: PoolConfig {
                max_concurrent: self.max_concurrent,
                ..PoolConfig::default()
            },
            log_threshold: self.log_threshold,
            drain_timeout: self.drain_timeout,
            hub,
        }
    }
}

/// Unset and empty variables both count as absent.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
