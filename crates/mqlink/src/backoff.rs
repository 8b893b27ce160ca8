//! Exponential backoff with jitter for transport (re)connects.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Delay schedule for one connect call.
#[derive(Debug)]
pub(crate) struct Backoff {
    delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
    max_attempts: u32,
}

impl Backoff {
    pub(crate) fn new(config: &BackoffConfig) -> Self {
        Self {
            delay: config.initial_delay(),
            max_delay: config.max_delay(),
            multiplier: config.multiplier,
            attempt: 0,
            max_attempts: config.max_attempts,
        }
    }

    /// Record a failed attempt. Returns the delay before the next one, or
    /// `None` once the attempt budget is spent.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }
        let base = self.delay;
        self.delay = Duration::from_secs_f64(
            (self.delay.as_secs_f64() * self.multiplier).min(self.max_delay.as_secs_f64()),
        );
        Some(jitter(base))
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Spread a delay by up to ±25%.
fn jitter(delay: Duration) -> Duration {
    let delay_ms = delay.as_millis() as u64;
    let mut rng = rand::thread_rng();
    let jitter = (delay_ms as f64 * 0.25 * (rng.gen::<f64>() * 2.0 - 1.0)) as i64;
    Duration::from_millis(delay_ms.saturating_add_signed(jitter))
}
