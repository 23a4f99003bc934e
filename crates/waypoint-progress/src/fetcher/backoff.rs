//! Exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Smallest delay ever returned, so a zero jitter draw never busy-loops.
const MIN_DELAY: Duration = Duration::from_millis(10);

/// Retry budget and delay curve for transient failures.
///
/// Used both for request-level retries and for subscription reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,

    /// Delay ceiling for the first retry.
    pub base_delay_ms: u64,

    /// Upper bound for any delay.
    pub max_delay_ms: u64,
}

impl BackoffPolicy {
    pub const fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Request-level defaults: 3 retries from 1s.
    pub const fn requests() -> Self {
        Self::new(3, 1_000, 30_000)
    }

    /// Reconnect defaults: 5 attempts from 500ms.
    pub const fn reconnects() -> Self {
        Self::new(5, 500, 30_000)
    }

    /// Whether `attempt` (1-based) is still within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Delay ceiling for `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Jittered delay for `attempt`, drawn uniformly from `[0, ceiling]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.ceiling(attempt).as_millis() as u64;
        let jittered = rand::thread_rng().gen_range(0..=ceiling_ms);
        Duration::from_millis(jittered).max(MIN_DELAY)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::reconnects()
    }
}
