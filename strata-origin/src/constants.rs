//! Constants for STRATA origin resilience
//!
//! Centralizing tuning defaults makes them easy to find, modify, and test.

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Consecutive failures before the circuit opens
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Probe successes needed to close the circuit from half-open
pub const DEFAULT_CIRCUIT_SUCCESS_THRESHOLD: u32 = 1;

/// How long the circuit stays open before probing (seconds)
pub const DEFAULT_CIRCUIT_COOL_DOWN_SECS: u64 = 30;

// ============================================================================
// RETRY
// ============================================================================

/// Maximum attempts per guarded call (first try + retries)
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;

/// Upper bound on any single backoff delay (milliseconds)
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;

/// Backoff multiplier applied to rate-limited failures
pub const DEFAULT_RETRY_RATE_LIMIT_MULTIPLIER: u32 = 4;

// ============================================================================
// TIMEOUT
// ============================================================================

/// Per-attempt origin timeout (seconds)
pub const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 30;
