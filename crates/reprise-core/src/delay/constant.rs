use std::time::Duration;

use super::{positive_delay, DelayStrategy, MaxAttempts};
use crate::error::{ConfigResult, DelayResult};

/// Waits the same fixed delay before every redelivery.
#[derive(Debug, Clone)]
pub struct ConstantDelayStrategy {
    max_attempts: MaxAttempts,
    delay: Duration,
}

impl ConstantDelayStrategy {
    pub fn new(max_attempts: u32, delay: Duration) -> ConfigResult<Self> {
        Ok(Self {
            max_attempts: MaxAttempts::new(max_attempts)?,
            delay: positive_delay("delay", delay)?,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }
}

impl DelayStrategy for ConstantDelayStrategy {
    fn can_delay(&self, attempt: u32) -> DelayResult<bool> {
        self.max_attempts.can_delay(attempt)
    }

    fn get_delay(&self, attempt: u32) -> DelayResult<Duration> {
        self.max_attempts.check(attempt)?;
        Ok(self.delay)
    }
}
