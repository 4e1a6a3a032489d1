//! Resilient origin wrapper: timeout + retry + circuit breaker.
//!
//! Every origin call in the system goes through a [`ResilientOrigin`].
//! Each attempt is bounded by a timeout and recorded against the origin's
//! circuit breaker; failures are retried per the [`RetryPolicy`] until the
//! attempts are exhausted or the breaker opens. A timed-out attempt gives
//! up on the result; whatever work the origin completes after the deadline
//! is simply never observed.

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::constants::DEFAULT_ORIGIN_TIMEOUT_SECS;
use crate::retry::RetryPolicy;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{CircuitState, Origin, OriginError};

/// Configuration for a guarded origin.
#[derive(Debug, Clone)]
pub struct ResilientOriginConfig {
    /// Per-attempt timeout. Latency-sensitive origins (classification)
    /// want this short; heavier generation calls want it longer.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

impl Default for ResilientOriginConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_ORIGIN_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ResilientOriginConfig {
    /// Create ResilientOriginConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_ORIGIN_TIMEOUT_SECS`: Per-attempt timeout (default: 30)
    ///
    /// Retry and breaker settings are read by [`RetryPolicy::from_env`] and
    /// [`CircuitBreakerConfig::from_env`].
    pub fn from_env() -> Self {
        let timeout = Duration::from_secs(
            std::env::var("STRATA_ORIGIN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS),
        );

        Self {
            timeout,
            retry: RetryPolicy::from_env(),
            breaker: CircuitBreakerConfig::from_env(),
        }
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the circuit breaker configuration.
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

/// An [`Origin`] wrapped with timeout, retry, and a per-origin circuit
/// breaker.
pub struct ResilientOrigin {
    origin: Arc<dyn Origin>,
    breaker: CircuitBreaker,
    config: ResilientOriginConfig,
}

impl ResilientOrigin {
    pub fn new(origin: Arc<dyn Origin>, config: ResilientOriginConfig) -> Self {
        let breaker = CircuitBreaker::new(config.breaker.clone());
        Self {
            origin,
            breaker,
            config,
        }
    }

    /// Wrap an origin with default tuning.
    pub fn with_defaults(origin: Arc<dyn Origin>) -> Self {
        Self::new(origin, ResilientOriginConfig::default())
    }

    pub fn origin_id(&self) -> &str {
        self.origin.origin_id()
    }

    /// Current circuit state, for health reporting.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// The underlying breaker, for operational tooling.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Fetch a fresh value for `key`, applying the full guard.
    pub async fn fetch(&self, key: &str) -> Result<Value, OriginError> {
        let origin_id = self.origin.origin_id().to_string();
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.is_allowed() {
                tracing::debug!(origin = %origin_id, key, "Circuit open, short-circuiting origin call");
                return Err(OriginError::CircuitOpen { origin: origin_id });
            }

            let outcome = match tokio::time::timeout(self.config.timeout, self.origin.fetch(key))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(OriginError::Timeout {
                    origin: origin_id.clone(),
                    timeout: self.config.timeout,
                }),
            };

            match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(error) => {
                    self.breaker.record_failure();

                    if !self.config.retry.should_retry(attempt, &error) {
                        tracing::warn!(
                            origin = %origin_id,
                            key,
                            attempt,
                            error = %error,
                            "Origin call failed, attempts exhausted"
                        );
                        return Err(error);
                    }

                    let delay = self.config.retry.delay_for(attempt, &error);
                    tracing::warn!(
                        origin = %origin_id,
                        key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Origin call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for ResilientOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientOrigin")
            .field("origin_id", &self.origin.origin_id())
            .field("circuit_state", &self.circuit_state())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
