//! Reconnect delays for the perception link.

use std::time::Duration;

use crate::config::LinkConfig;
use crate::error::CoachError;

/// Exponent cap for the doubling backoff.
const MAX_DOUBLINGS: u32 = 5;

/// Chooses how long to wait before the next connection attempt.
///
/// A rejected resumption handle retries after the fast delay without
/// counting as a failure. Any other failure doubles the base delay per
/// consecutive attempt, capped, plus up to 10% jitter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    fast: Duration,
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            fast: Duration::from_millis(config.fast_retry_ms),
            base: Duration::from_millis(config.base_retry_ms),
            max: Duration::from_millis(config.max_retry_ms),
            attempt: 0,
        }
    }

    /// Consecutive generic failures since the last successful connect.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// A connection came up; the next failure starts from the base delay.
    pub fn on_connected(&mut self) {
        self.attempt = 0;
    }

    /// Delay before retrying after `error`.
    pub fn on_failure(&mut self, error: &CoachError) -> Duration {
        if error.is_stale_resumption() {
            return self.fast;
        }
        let delay = self.backoff(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        let jitter = delay.as_secs_f64() * (rand::random::<f64>() * 0.1);
        delay + Duration::from_secs_f64(jitter)
    }

    /// Un-jittered delay for the given failure count.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt.min(MAX_DOUBLINGS)))
            .min(self.max)
    }
}
