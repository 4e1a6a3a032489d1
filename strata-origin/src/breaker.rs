//! Circuit breaker for origin health management.
//!
//! An explicit state machine (`Closed -> Open -> HalfOpen`) rather than
//! flags scattered across the call path. While open, guarded calls are
//! rejected without touching the origin; after the cool-down a single
//! probe is let through to test recovery.

use crate::constants::{
    DEFAULT_CIRCUIT_COOL_DOWN_SECS, DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
    DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use strata_core::CircuitState;

/// Configuration for circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Probe successes needed to close from half-open.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing.
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
            cool_down: Duration::from_secs(DEFAULT_CIRCUIT_COOL_DOWN_SECS),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create CircuitBreakerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_CIRCUIT_FAILURE_THRESHOLD`: Failures before opening (default: 5)
    /// - `STRATA_CIRCUIT_SUCCESS_THRESHOLD`: Successes to close from half-open (default: 1)
    /// - `STRATA_CIRCUIT_COOL_DOWN_SECS`: How long the circuit stays open (default: 30)
    pub fn from_env() -> Self {
        let failure_threshold = std::env::var("STRATA_CIRCUIT_FAILURE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CIRCUIT_FAILURE_THRESHOLD);

        let success_threshold = std::env::var("STRATA_CIRCUIT_SUCCESS_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CIRCUIT_SUCCESS_THRESHOLD);

        let cool_down = Duration::from_secs(
            std::env::var("STRATA_CIRCUIT_COOL_DOWN_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CIRCUIT_COOL_DOWN_SECS),
        );

        Self {
            failure_threshold,
            success_threshold,
            cool_down,
        }
    }
}

/// Circuit breaker guarding one origin.
pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    probe_in_flight: AtomicBool,
    last_failure: RwLock<Option<Instant>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            probe_in_flight: AtomicBool::new(false),
            last_failure: RwLock::new(None),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    /// Whether a call may proceed right now.
    ///
    /// Open circuits transition to half-open once the cool-down has
    /// elapsed; in half-open, only one probe is admitted at a time - the
    /// caller that wins the claim performs the probe, everyone else is
    /// rejected until its outcome is recorded.
    pub fn is_allowed(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = self
                    .last_failure
                    .read()
                    .ok()
                    .and_then(|guard| *guard)
                    .map(|last| last.elapsed() > self.config.cool_down)
                    .unwrap_or(false);

                if cooled_down {
                    self.state
                        .store(CircuitState::HalfOpen as u8, Ordering::SeqCst);
                    return self.try_claim_probe();
                }
                false
            }
            CircuitState::HalfOpen => self.try_claim_probe(),
        }
    }

    fn try_claim_probe(&self) -> bool {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        self.probe_in_flight.store(false, Ordering::SeqCst);

        if self.state() == CircuitState::HalfOpen {
            let count = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= self.config.success_threshold {
                self.state
                    .store(CircuitState::Closed as u8, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
            }
        }
    }

    pub fn record_failure(&self) {
        self.success_count.store(0, Ordering::SeqCst);
        self.probe_in_flight.store(false, Ordering::SeqCst);

        if let Ok(mut guard) = self.last_failure.write() {
            *guard = Some(Instant::now());
        }

        if self.state() == CircuitState::HalfOpen {
            // Failed probe reopens immediately regardless of the threshold.
            self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
            return;
        }

        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.config.failure_threshold {
            self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
        }
    }

    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.probe_in_flight.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_failure.write() {
            *guard = None;
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Relaxed))
            .field("success_count", &self.success_count.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
