use std::sync::Arc;
use std::time::Duration;

use crate::config::{DelayStrategyConfig, RetryConfig};
use crate::delay::{
    ConstantDelayStrategy, DelayStrategy, ExponentialDelayStrategy,
    ExponentialWithJitterDelayStrategy, LinearDelayStrategy, NoDelayStrategy,
};
use crate::error::ConfigResult;

/// Retry behaviour of a reprocessor: exactly one delay strategy.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    strategy: Arc<dyn DelayStrategy>,
}

impl RetrySettings {
    pub fn new(strategy: impl DelayStrategy + 'static) -> Self {
        Self {
            strategy: Arc::new(strategy),
        }
    }

    /// Share one strategy (and its random source) between several settings.
    pub fn from_shared(strategy: Arc<dyn DelayStrategy>) -> Self {
        Self { strategy }
    }

    /// Build and validate the strategy described by `config`.
    pub fn from_config(config: &RetryConfig) -> ConfigResult<Self> {
        let strategy: Arc<dyn DelayStrategy> = match config.strategy {
            DelayStrategyConfig::Constant {
                max_attempts,
                delay_ms,
            } => Arc::new(ConstantDelayStrategy::new(
                max_attempts,
                Duration::from_millis(delay_ms),
            )?),
            DelayStrategyConfig::Linear {
                max_attempts,
                initial_delay_ms,
                factor,
            } => Arc::new(LinearDelayStrategy::new(
                max_attempts,
                Duration::from_millis(initial_delay_ms),
                factor,
            )?),
            DelayStrategyConfig::Exponential {
                max_attempts,
                initial_delay_ms,
                exponent,
            } => Arc::new(ExponentialDelayStrategy::new(
                max_attempts,
                Duration::from_millis(initial_delay_ms),
                exponent,
            )?),
            DelayStrategyConfig::ExponentialWithJitter {
                max_attempts,
                initial_delay_ms,
                exponent,
                seed,
            } => Arc::new(ExponentialWithJitterDelayStrategy::new(
                max_attempts,
                Duration::from_millis(initial_delay_ms),
                exponent,
                seed,
            )?),
            DelayStrategyConfig::None => Arc::new(NoDelayStrategy),
        };
        Ok(Self { strategy })
    }

    pub fn strategy(&self) -> &dyn DelayStrategy {
        self.strategy.as_ref()
    }
}
