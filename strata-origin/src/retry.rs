//! Retry policy with exponential backoff and jitter.
//!
//! Backoff doubles per attempt and is capped; jitter keeps retries across
//! handlers from aligning. Rate-limited failures wait longer than generic
//! ones and honor the origin's `retry-after` hint when it is larger than
//! the computed backoff.

use crate::constants::{
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_DELAY_MS,
    DEFAULT_RETRY_RATE_LIMIT_MULTIPLIER,
};
use std::time::Duration;
use strata_core::OriginError;

/// Retry tuning for one guarded origin.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call (first try + retries).
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles per subsequent retry.
    pub base_delay: Duration,
    /// Cap on any single backoff delay (before the rate-limit multiplier).
    pub max_delay: Duration,
    /// Multiplier applied to the backoff of rate-limited failures.
    pub rate_limit_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            rate_limit_multiplier: DEFAULT_RETRY_RATE_LIMIT_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Create RetryPolicy from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_RETRY_MAX_ATTEMPTS`: Attempts per call (default: 3)
    /// - `STRATA_RETRY_BASE_DELAY_MS`: First backoff delay (default: 200)
    /// - `STRATA_RETRY_MAX_DELAY_MS`: Backoff cap (default: 10000)
    /// - `STRATA_RETRY_RATE_LIMIT_MULTIPLIER`: Rate-limit backoff multiplier (default: 4)
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("STRATA_RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS);

        let base_delay = Duration::from_millis(
            std::env::var("STRATA_RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
        );

        let max_delay = Duration::from_millis(
            std::env::var("STRATA_RETRY_MAX_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS),
        );

        let rate_limit_multiplier = std::env::var("STRATA_RETRY_RATE_LIMIT_MULTIPLIER")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RETRY_RATE_LIMIT_MULTIPLIER);

        Self {
            max_attempts,
            base_delay,
            max_delay,
            rate_limit_multiplier,
        }
    }

    /// Create a policy for development/testing with near-zero delays.
    pub fn development() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            rate_limit_multiplier: 2,
        }
    }

    /// Whether the call should be retried after `error` on 0-based `attempt`.
    ///
    /// A short-circuited call is never retried: the breaker has already
    /// decided the origin is down, and hammering it defeats the cool-down.
    pub fn should_retry(&self, attempt: u32, error: &OriginError) -> bool {
        if error.is_short_circuit() {
            return false;
        }
        attempt + 1 < self.max_attempts
    }

    /// Backoff before retrying after `error` on 0-based `attempt`.
    pub fn delay_for(&self, attempt: u32, error: &OriginError) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);

        // Half fixed, half jitter, so delays never collapse to zero but
        // concurrent retries still spread out.
        let half = exp / 2;
        let jittered = half + half.mul_f64(rand::random::<f64>());

        match error {
            OriginError::RateLimited { retry_after_ms, .. } => {
                let scaled = jittered.saturating_mul(self.rate_limit_multiplier);
                let hint = Duration::from_millis((*retry_after_ms).max(0) as u64);
                scaled.max(hint)
            }
            _ => jittered,
        }
    }
}
