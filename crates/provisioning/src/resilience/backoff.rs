//! Exponential backoff with optional multiplicative jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Configuration for the retry loop's delay schedule.
///
/// Supplied once when the engine is constructed and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay preceding the second attempt, doubled for each later attempt.
    #[serde(with = "crate::config::serde_millis")]
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "crate::config::serde_millis")]
    pub max_delay: Duration,
    /// Retries after the first attempt; the operation runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    /// Multiply each delay by a factor drawn uniformly from `[0.5, 1.5)`.
    pub jitter: bool,
    /// Optional wall-clock budget for one whole retry sequence.
    /// `None` bounds the sequence by attempt count only.
    #[serde(with = "crate::config::serde_millis_opt")]
    pub deadline: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_retries: 3,
            jitter: true,
            deadline: None,
        }
    }
}

impl BackoffConfig {
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Checks `base_delay > 0`, `max_delay >= base_delay`, and a non-zero
    /// deadline when one is set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::ZeroBaseDelay);
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::MaxDelayBelowBase {
                base_delay: self.base_delay,
                max_delay: self.max_delay,
            });
        }
        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroDeadline);
        }
        Ok(())
    }
}

/// Computes retry delays from the attempt index.
///
/// `attempt_index` 0 is the delay preceding the second attempt.
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    rng: fastrand::Rng,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            rng: fastrand::Rng::new(),
        }
    }

    /// Creates a policy with a deterministic jitter source.
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self {
            config,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// `min(max_delay, base_delay × 2^attempt_index)`, scaled by jitter when
    /// enabled. The jittered value is clamped so it never exceeds
    /// `max_delay`.
    pub fn compute_delay(&mut self, attempt_index: u32) -> Duration {
        let capped = exponential_delay(&self.config, attempt_index);
        if !self.config.jitter {
            return capped;
        }
        let factor = 0.5 + self.rng.f64();
        capped.mul_f64(factor).min(self.config.max_delay)
    }
}

fn exponential_delay(config: &BackoffConfig, attempt_index: u32) -> Duration {
    let Some(multiplier) = 1u32.checked_shl(attempt_index) else {
        return config.max_delay;
    };
    config
        .base_delay
        .checked_mul(multiplier)
        .map_or(config.max_delay, |d| d.min(config.max_delay))
}
