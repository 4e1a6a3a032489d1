//! Read results with tier and staleness metadata.
//!
//! Every read answered by the manager carries metadata telling the caller
//! which tier served it, how old the data is, and whether it is past the
//! namespace's refresh threshold. Stale data is still valid data; the flag
//! exists so callers can surface it, not so they can reject it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which tier answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Served from the in-process hot tier.
    L1,
    /// Served from the durable entry store.
    L2,
    /// Fetched synchronously from the origin on a total miss.
    Origin,
}

/// Metadata attached to every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadMetadata {
    pub source: CacheSource,
    /// Age of the data (now - cached_at), zero for origin fetches.
    pub age: Duration,
    /// Whether the data is past its namespace's refresh threshold.
    pub stale: bool,
}

/// A cached value plus its read metadata.
#[derive(Debug, Clone)]
pub struct CachedValue<T> {
    value: T,
    metadata: ReadMetadata,
}

impl<T> CachedValue<T> {
    pub fn new(value: T, metadata: ReadMetadata) -> Self {
        Self { value, metadata }
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Split into value and metadata.
    pub fn into_parts(self) -> (T, ReadMetadata) {
        (self.value, self.metadata)
    }

    pub fn metadata(&self) -> ReadMetadata {
        self.metadata
    }

    pub fn source(&self) -> CacheSource {
        self.metadata.source
    }

    pub fn age(&self) -> Duration {
        self.metadata.age
    }

    pub fn is_stale(&self) -> bool {
        self.metadata.stale
    }

    /// Map the inner value to a new type, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> CachedValue<U>
    where
        F: FnOnce(T) -> U,
    {
        CachedValue {
            value: f(self.value),
            metadata: self.metadata,
        }
    }
}

impl<T> AsRef<T> for CachedValue<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
