//! Error types for STRATA operations

use std::time::Duration;
use thiserror::Error;

/// Origin call errors.
///
/// Every failure mode of an external source-of-truth call, including the
/// short-circuit produced by an open circuit breaker. The distinction
/// between variants matters for backoff: rate limits back off longer than
/// generic failures, and `CircuitOpen` is never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OriginError {
    #[error("Origin {origin} timed out after {timeout:?}")]
    Timeout { origin: String, timeout: Duration },

    #[error("Rate limited by {origin}, retry after {retry_after_ms}ms")]
    RateLimited { origin: String, retry_after_ms: i64 },

    #[error("Transport failure from {origin}: {reason}")]
    Transport { origin: String, reason: String },

    #[error("Origin {origin} failed: {reason}")]
    Failed { origin: String, reason: String },

    #[error("Circuit open for origin {origin}")]
    CircuitOpen { origin: String },
}

impl OriginError {
    /// The origin this error came from.
    pub fn origin(&self) -> &str {
        match self {
            Self::Timeout { origin, .. }
            | Self::RateLimited { origin, .. }
            | Self::Transport { origin, .. }
            | Self::Failed { origin, .. }
            | Self::CircuitOpen { origin } => origin,
        }
    }

    /// Returns true if this is a rate-limit response.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns true if this error was produced without reaching the origin.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Durable store (L2) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store read failed for {namespace}/{key}: {reason}")]
    Read {
        namespace: String,
        key: String,
        reason: String,
    },

    #[error("Store write failed for {namespace}/{key}: {reason}")]
    Write {
        namespace: String,
        key: String,
        reason: String,
    },

    #[error("Stored record for {namespace}/{key} is unreadable: {reason}")]
    Decode {
        namespace: String,
        key: String,
        reason: String,
    },

    #[error("Store environment error: {reason}")]
    Env { reason: String },
}

impl StoreError {
    /// Returns true if the stored record exists but could not be decoded.
    ///
    /// Decode failures are downgraded to a miss by the cache manager; the
    /// underlying record is left in place for a later write to repair.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

/// Master error type for all STRATA operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Origin error: {0}")]
    Origin(#[from] OriginError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Miss for {namespace}/{key} and origin fetch failed: {source}")]
    MissAndOriginFailed {
        namespace: String,
        key: String,
        #[source]
        source: OriginError,
    },

    #[error("Payload for {namespace}/{key} could not be converted: {reason}")]
    PayloadType {
        namespace: String,
        key: String,
        reason: String,
    },

    #[error("Namespace not configured: {namespace}")]
    NamespaceNotConfigured { namespace: String },
}

/// Result type alias for STRATA operations.
pub type StrataResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
