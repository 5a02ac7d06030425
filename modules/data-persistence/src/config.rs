use std::env;
use std::str::FromStr;

use tracing::info;

use crate::bus::{DEFAULT_CAPACITY, MAX_CAPACITY};
use crate::error::{EffectError, Result};

/// Log output format for binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = EffectError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(EffectError::Config(format!(
                "DATA_PERSISTENCE_LOG_FORMAT must be `pretty` or `json`, got `{other}`"
            ))),
        }
    }
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Buffered actions per `ActionBus` subscriber.
    pub bus_capacity: usize,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_CAPACITY,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Unset vars use defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let bus_capacity = match lookup("DATA_PERSISTENCE_BUS_CAPACITY") {
            Some(raw) => {
                let capacity: usize = raw.trim().parse().map_err(|_| {
                    EffectError::Config(format!(
                        "DATA_PERSISTENCE_BUS_CAPACITY must be a number, got `{raw}`"
                    ))
                })?;
                if capacity == 0 || capacity > MAX_CAPACITY {
                    return Err(EffectError::Config(format!(
                        "DATA_PERSISTENCE_BUS_CAPACITY must be between 1 and {MAX_CAPACITY}, got {capacity}"
                    )));
                }
                capacity
            }
            None => defaults.bus_capacity,
        };

        let log_format = match lookup("DATA_PERSISTENCE_LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => defaults.log_format,
        };

        Ok(Self {
            bus_capacity,
            log_format,
        })
    }

    pub fn log_redacted(&self) {
        info!(
            bus_capacity = self.bus_capacity,
            log_format = ?self.log_format,
            "Effect configuration loaded"
        );
    }
}
