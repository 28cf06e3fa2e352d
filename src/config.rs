//! Sniffer timing configuration.
//!
//! Defaults match the deployed firmware: hop every second, poll the climate
//! sensor every three hops.

use crate::stats::DEFAULT_STATS_PORT;
use std::time::Duration;

/// First channel of a sweep.
pub const FIRST_CHANNEL: u8 = 1;

/// Last channel of a sweep; the tick after it wraps.
pub const LAST_CHANNEL: u8 = 13;

/// Default time spent on each channel.
pub const DEFAULT_HOP_INTERVAL: Duration = Duration::from_millis(1000);

/// Default climate sensor polling interval.
pub const DEFAULT_SENSOR_INTERVAL: Duration = Duration::from_millis(3000);

/// Runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnifferConfig {
    /// Time spent on each channel before hopping.
    pub hop_interval: Duration,
    /// How often the climate sensor is read.
    pub sensor_interval: Duration,
    /// Port for the `/stats` endpoint.
    pub stats_port: u16,
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            hop_interval: DEFAULT_HOP_INTERVAL,
            sensor_interval: DEFAULT_SENSOR_INTERVAL,
            stats_port: DEFAULT_STATS_PORT,
        }
    }
}

impl SnifferConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hop_interval.is_zero() {
            return Err(ConfigError::Invalid("hop_interval must be > 0"));
        }
        if self.sensor_interval.is_zero() {
            return Err(ConfigError::Invalid("sensor_interval must be > 0"));
        }
        if self.sensor_interval < self.hop_interval {
            return Err(ConfigError::Invalid(
                "sensor_interval must be >= hop_interval",
            ));
        }
        Ok(())
    }

    /// Build a configuration from environment-style overrides.
    ///
    /// `lookup` returns the value of a variable, if set. Recognised keys:
    /// `SNIFFER_HOP_MS`, `SNIFFER_SENSOR_MS`, `SNIFFER_STATS_PORT`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = lookup("SNIFFER_HOP_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("SNIFFER_HOP_MS must be an integer"))?;
            config.hop_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = lookup("SNIFFER_SENSOR_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("SNIFFER_SENSOR_MS must be an integer"))?;
            config.sensor_interval = Duration::from_millis(ms);
        }
        if let Some(port) = lookup("SNIFFER_STATS_PORT") {
            config.stats_port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("SNIFFER_STATS_PORT must be a port number"))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid configuration parameter.
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
