//! Delay strategies decide whether a retryable failure may be rescheduled
//! and how long the redelivery should wait.
//!
//! Attempts are 1-based: `attempt` is always the attempt about to be
//! scheduled, i.e. the number of prior retryable failures plus one.

mod constant;
mod exponential;
mod jitter;
mod linear;
mod none;

use std::fmt::Debug;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult, DelayError, DelayResult};

pub use constant::ConstantDelayStrategy;
pub use exponential::ExponentialDelayStrategy;
pub use jitter::ExponentialWithJitterDelayStrategy;
pub use linear::LinearDelayStrategy;
pub use none::NoDelayStrategy;

pub trait DelayStrategy: Send + Sync + Debug {
    /// Whether `attempt` may still be delayed. Returns `Ok(false)` once the
    /// strategy is exhausted; fails only for `attempt == 0`.
    fn can_delay(&self, attempt: u32) -> DelayResult<bool>;

    /// The delay to apply before `attempt` is delivered.
    fn get_delay(&self, attempt: u32) -> DelayResult<Duration>;
}

/// Inclusive upper bound on delayed attempts, shared by every strategy that
/// actually delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MaxAttempts(u32);

impl MaxAttempts {
    pub(crate) fn new(max_attempts: u32) -> ConfigResult<Self> {
        if max_attempts < 1 {
            return Err(ConfigError::parameter(
                "max_attempts",
                "should be greater or equal to 1",
            ));
        }
        Ok(Self(max_attempts))
    }

    pub(crate) fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn can_delay(self, attempt: u32) -> DelayResult<bool> {
        if attempt == 0 {
            return Err(DelayError::ZeroAttempt);
        }
        Ok(attempt <= self.0)
    }

    pub(crate) fn check(self, attempt: u32) -> DelayResult<()> {
        if attempt == 0 {
            return Err(DelayError::ZeroAttempt);
        }
        if attempt > self.0 {
            return Err(DelayError::AttemptOutOfRange {
                attempt,
                max_attempts: self.0,
            });
        }
        Ok(())
    }
}

pub(crate) fn positive_delay(name: &'static str, delay: Duration) -> ConfigResult<Duration> {
    if delay.is_zero() {
        return Err(ConfigError::parameter(name, "should be greater than zero"));
    }
    Ok(delay)
}

pub(crate) fn at_least_one(name: &'static str, value: f64) -> ConfigResult<f64> {
    // `!(x >= 1.0)` also rejects NaN.
    if !(value >= 1.0) || !value.is_finite() {
        return Err(ConfigError::parameter(
            name,
            format!("should be a finite number greater or equal to 1, got {value}"),
        ));
    }
    Ok(value)
}

/// Scale `base` by `factor`, failing instead of panicking when the result
/// does not fit in a `Duration`.
pub(crate) fn scale(base: Duration, factor: f64, attempt: u32) -> DelayResult<Duration> {
    Duration::try_from_secs_f64(base.as_secs_f64() * factor)
        .map_err(|_| DelayError::Overflow { attempt })
}
