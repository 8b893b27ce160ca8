//! Reconnect backoff configuration.

use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_BACKOFF_INITIAL_DELAY_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_DELAY_MS: u64 = 5000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_BACKOFF_MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff applied to transport create/connect failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on a single delay before jitter.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Total transport attempts before connect gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_BACKOFF_INITIAL_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_BACKOFF_MAX_DELAY_MS
}
fn default_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}
fn default_max_attempts() -> u32 {
    DEFAULT_BACKOFF_MAX_ATTEMPTS
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_BACKOFF_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_BACKOFF_MAX_DELAY_MS,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_attempts: DEFAULT_BACKOFF_MAX_ATTEMPTS,
        }
    }
}

impl BackoffConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("backoff.max_attempts must be at least 1".into());
        }
        if self.multiplier < 1.0 {
            return Err("backoff.multiplier must be >= 1.0".into());
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err("backoff.initial_delay_ms exceeds max_delay_ms".into());
        }
        Ok(())
    }
}
