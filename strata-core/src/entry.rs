//! Cache entry model shared by both tiers.
//!
//! A [`CacheEntry`] is the durable record held by the entry store (L2).
//! Its `cached_at` timestamp tracks the age of the *data*, not of the
//! storage operation: a refresh that fails leaves `cached_at` untouched,
//! so the entry keeps serving with an honest age.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Fully-qualified cache key: a namespace plus a key unique within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub namespace: String,
    pub key: String,
}

impl EntryKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

/// A durable cache record.
///
/// Entries are created on the first successful origin fetch (or explicit
/// write) for a key, mutated in place by every subsequent successful
/// refresh, and destroyed only by explicit delete/clear operations -
/// never by a read-time expiry check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Logical partition; carries its own TTL/refresh policy.
    pub namespace: String,
    /// Unique within the namespace.
    pub key: String,
    /// Opaque serialized value. The cache never interprets it.
    pub payload: Value,
    /// When the stored value was last successfully produced.
    pub cached_at: DateTime<Utc>,
    /// Last refresh attempt, regardless of outcome.
    pub last_refresh_attempt_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Create a new entry with `cached_at = now`.
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, payload: Value) -> Self {
        Self::with_cached_at(namespace, key, payload, Utc::now())
    }

    /// Create a new entry with an explicit `cached_at` timestamp.
    pub fn with_cached_at(
        namespace: impl Into<String>,
        key: impl Into<String>,
        payload: Value,
        cached_at: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            payload,
            cached_at,
            last_refresh_attempt_at: None,
        }
    }

    /// The fully-qualified key for this entry.
    pub fn entry_key(&self) -> EntryKey {
        EntryKey::new(self.namespace.clone(), self.key.clone())
    }

    /// Age of the stored data as of `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        if now > self.cached_at {
            (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }

    /// Age of the stored data as of the current instant.
    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    /// Whether the entry is older than the namespace's refresh threshold.
    ///
    /// Stale entries are still valid to serve; staleness only means a
    /// background refresh should be considered.
    pub fn is_stale(&self, refresh_threshold: Duration) -> bool {
        self.age() > refresh_threshold
    }

    /// Apply a successful refresh: replace the payload and advance both
    /// `cached_at` and `last_refresh_attempt_at`.
    pub fn record_refresh_success(&mut self, payload: Value, at: DateTime<Utc>) {
        self.payload = payload;
        self.cached_at = at;
        self.last_refresh_attempt_at = Some(at);
    }

    /// Apply a failed refresh: stamp the attempt without touching the
    /// payload or `cached_at`.
    pub fn record_refresh_failure(&mut self, at: DateTime<Utc>) {
        self.last_refresh_attempt_at = Some(at);
    }
}
