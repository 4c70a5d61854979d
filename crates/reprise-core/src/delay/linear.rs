use std::time::Duration;

use super::{at_least_one, positive_delay, scale, DelayStrategy, MaxAttempts};
use crate::error::{ConfigResult, DelayResult};

/// Delay grows linearly: `initial_delay * factor * attempt`.
#[derive(Debug, Clone)]
pub struct LinearDelayStrategy {
    max_attempts: MaxAttempts,
    initial_delay: Duration,
    factor: f64,
}

impl LinearDelayStrategy {
    pub fn new(max_attempts: u32, initial_delay: Duration, factor: f64) -> ConfigResult<Self> {
        Ok(Self {
            max_attempts: MaxAttempts::new(max_attempts)?,
            initial_delay: positive_delay("initial_delay", initial_delay)?,
            factor: at_least_one("factor", factor)?,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }
}

impl DelayStrategy for LinearDelayStrategy {
    fn can_delay(&self, attempt: u32) -> DelayResult<bool> {
        self.max_attempts.can_delay(attempt)
    }

    fn get_delay(&self, attempt: u32) -> DelayResult<Duration> {
        self.max_attempts.check(attempt)?;
        scale(self.initial_delay, self.factor * f64::from(attempt), attempt)
    }
}
