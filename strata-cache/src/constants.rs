//! Constants for the STRATA cache engine
//!
//! Centralizing tuning defaults makes them easy to find, modify, and test.

// ============================================================================
// PROMOTION
// ============================================================================

/// How often the promotion task runs (seconds)
pub const DEFAULT_PROMOTION_INTERVAL_SECS: u64 = 300;

/// How many keys each promotion cycle warms into L1
pub const DEFAULT_PROMOTION_TOP_N: usize = 32;

/// Bound on the access tracker; least-accessed keys are dropped beyond this
pub const MAX_TRACKED_KEYS: usize = 10_000;

// ============================================================================
// HEALTH
// ============================================================================

/// Minimum lookups in a namespace before its rates affect the health score
pub const HEALTH_MIN_SAMPLE: u64 = 10;

/// Target combined (L1 + L2) hit rate used in health scoring
pub const HEALTH_TARGET_HIT_RATE: f64 = 0.8;
