use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{at_least_one, positive_delay, DelayStrategy, MaxAttempts};
use crate::error::{ConfigResult, DelayError, DelayResult};

/// Exponential growth with full jitter: the delay for `attempt` is drawn
/// uniformly from `[initial_delay, exponent^attempt]` milliseconds.
///
/// A single instance may be shared by several registrations, so draws from
/// the random source are serialized behind a mutex.
#[derive(Debug)]
pub struct ExponentialWithJitterDelayStrategy {
    max_attempts: MaxAttempts,
    initial_delay: Duration,
    exponent: f64,
    rng: Mutex<StdRng>,
}

impl ExponentialWithJitterDelayStrategy {
    /// `seed` makes the sequence of delays reproducible; leave it `None`
    /// outside of tests.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        exponent: f64,
        seed: Option<u64>,
    ) -> ConfigResult<Self> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            max_attempts: MaxAttempts::new(max_attempts)?,
            initial_delay: positive_delay("initial_delay", initial_delay)?,
            exponent: at_least_one("exponent", exponent)?,
            rng: Mutex::new(rng),
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    /// Uniform draw between two nanosecond bounds, in either order. The
    /// result is rounded and clamped so it never leaves the range.
    fn uniform(&self, low_ns: u64, high_ns: u64) -> u64 {
        let sample: f64 = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.random()
        };
        let drawn = (low_ns as f64 + (high_ns as f64 - low_ns as f64) * sample).round();
        let (min, max) = (low_ns.min(high_ns), low_ns.max(high_ns));
        (drawn as u64).clamp(min, max)
    }
}

impl DelayStrategy for ExponentialWithJitterDelayStrategy {
    fn can_delay(&self, attempt: u32) -> DelayResult<bool> {
        self.max_attempts.can_delay(attempt)
    }

    fn get_delay(&self, attempt: u32) -> DelayResult<Duration> {
        self.max_attempts.check(attempt)?;
        let overflow = DelayError::Overflow { attempt };

        let low_ns = u64::try_from(self.initial_delay.as_nanos()).map_err(|_| overflow.clone())?;
        let high = (self.exponent.powf(f64::from(attempt)) * 1_000_000.0).round();
        if !high.is_finite() || high >= u64::MAX as f64 {
            return Err(overflow);
        }
        let high_ns = high as u64;

        if low_ns == high_ns {
            return Ok(self.initial_delay);
        }
        Ok(Duration::from_nanos(self.uniform(low_ns, high_ns)))
    }
}
