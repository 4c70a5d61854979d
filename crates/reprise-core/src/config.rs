use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Top-level reprocessor configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReprocessorConfig {
    pub retry: RetryConfig,
    pub handler: HandlerConfig,
}

/// Which delay strategy to use for retryable failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: DelayStrategyConfig,
}

/// Delay strategy parameters. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelayStrategyConfig {
    Constant {
        max_attempts: u32,
        delay_ms: u64,
    },
    Linear {
        max_attempts: u32,
        initial_delay_ms: u64,
        factor: f64,
    },
    Exponential {
        max_attempts: u32,
        initial_delay_ms: u64,
        exponent: f64,
    },
    ExponentialWithJitter {
        max_attempts: u32,
        initial_delay_ms: u64,
        exponent: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
    None,
}

/// Handler registration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// How long `unregister` waits for an in-flight handler to finish.
    pub drain_timeout_ms: u64,
}

impl HandlerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: DelayStrategyConfig::Exponential {
                max_attempts: 5,
                initial_delay_ms: 1000,
                exponent: 2.0,
            },
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 30_000,
        }
    }
}

/// Read and parse a TOML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<ReprocessorConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "loaded configuration");
    Ok(config)
}
