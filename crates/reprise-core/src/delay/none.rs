use std::time::Duration;

use super::DelayStrategy;
use crate::error::{DelayError, DelayResult};

/// Never delays: every retryable failure is dead-lettered immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelayStrategy;

impl DelayStrategy for NoDelayStrategy {
    fn can_delay(&self, _attempt: u32) -> DelayResult<bool> {
        Ok(false)
    }

    fn get_delay(&self, _attempt: u32) -> DelayResult<Duration> {
        Err(DelayError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_delays() {
        for attempt in [0, 1, 2, u32::MAX] {
            assert_eq!(NoDelayStrategy.can_delay(attempt), Ok(false));
            assert_eq!(NoDelayStrategy.get_delay(attempt), Err(DelayError::Unsupported));
        }
    }
}
