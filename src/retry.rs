//! Exponential backoff with jitter
//!
//! Shared by the fetcher (throttling backoff inside one call) and the
//! consumer (message redelivery delay).

use crate::error::WarmError;
use rand::Rng;
use std::time::Duration;

/// Retry policy with capped exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed, the first one included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base: Duration,
    /// Ceiling for any single delay, jitter excluded
    pub max: Duration,
    /// Upper bound of the random delay added to each backoff
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, max: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            base,
            max,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    /// ended in `error`
    pub fn should_retry(&self, attempts_made: u32, error: &WarmError) -> bool {
        attempts_made < self.max_attempts && error.should_retry()
    }

    /// Backoff before retry number `retry` (0 for the first retry):
    /// base, 2x base, 4x base, ... capped at `max`
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// [`backoff_duration`](Self::backoff_duration) plus uniform jitter
    pub fn jittered_backoff(&self, retry: u32) -> Duration {
        let base = self.backoff_duration(retry);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        base + Duration::from_millis(extra)
    }
}
