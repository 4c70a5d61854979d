use std::time::Duration;

use super::{at_least_one, positive_delay, scale, DelayStrategy, MaxAttempts};
use crate::error::{ConfigResult, DelayResult};

/// Delay grows geometrically: `initial_delay * exponent^attempt`.
#[derive(Debug, Clone)]
pub struct ExponentialDelayStrategy {
    max_attempts: MaxAttempts,
    initial_delay: Duration,
    exponent: f64,
}

impl ExponentialDelayStrategy {
    pub fn new(max_attempts: u32, initial_delay: Duration, exponent: f64) -> ConfigResult<Self> {
        Ok(Self {
            max_attempts: MaxAttempts::new(max_attempts)?,
            initial_delay: positive_delay("initial_delay", initial_delay)?,
            exponent: at_least_one("exponent", exponent)?,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }
}

impl DelayStrategy for ExponentialDelayStrategy {
    fn can_delay(&self, attempt: u32) -> DelayResult<bool> {
        self.max_attempts.can_delay(attempt)
    }

    fn get_delay(&self, attempt: u32) -> DelayResult<Duration> {
        self.max_attempts.check(attempt)?;
        scale(
            self.initial_delay,
            self.exponent.powf(f64::from(attempt)),
            attempt,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_initial_times_exponent_to_the_attempt() {
        let strategy = ExponentialDelayStrategy::new(4, Duration::from_secs(1), 2.0).unwrap();
        assert_eq!(strategy.get_delay(1).unwrap(), Duration::from_secs(2));
        assert_eq!(strategy.get_delay(2).unwrap(), Duration::from_secs(4));
        assert_eq!(strategy.get_delay(4).unwrap(), Duration::from_secs(16));
    }

    #[test]
    fn unit_exponent_keeps_the_initial_delay() {
        let strategy = ExponentialDelayStrategy::new(3, Duration::from_millis(500), 1.0).unwrap();
        for attempt in 1..=3 {
            assert_eq!(strategy.get_delay(attempt).unwrap(), Duration::from_millis(500));
        }
    }

    #[test]
    fn huge_delays_fail_instead_of_panicking() {
        let strategy =
            ExponentialDelayStrategy::new(u32::MAX, Duration::from_secs(1), 1000.0).unwrap();
        assert_eq!(
            strategy.get_delay(200),
            Err(crate::error::DelayError::Overflow { attempt: 200 })
        );
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let err = ExponentialDelayStrategy::new(3, Duration::ZERO, 2.0).unwrap_err();
        assert!(err.to_string().contains("initial_delay"), "{err}");

        let err = ExponentialDelayStrategy::new(3, Duration::from_secs(1), 0.0).unwrap_err();
        assert!(err.to_string().contains("exponent"), "{err}");

        let err = ExponentialDelayStrategy::new(0, Duration::from_secs(1), 2.0).unwrap_err();
        assert!(err.to_string().contains("max_attempts"), "{err}");
    }
}
