//! Durable entry store (L2) contract.
//!
//! The entry store holds cache entries indefinitely. The design rule that
//! everything else in the engine leans on: `read` never mutates or removes
//! an entry, however old it is. Staleness is a policy decision made by the
//! tiered cache manager, not a storage-layer concern - conflating "old"
//! with "invalid" causes unnecessary origin calls and availability gaps.
//!
//! Removal happens only through the explicit `delete` / `clear_namespace`
//! admin paths or by overwriting a key.

use async_trait::async_trait;
use strata_core::{CacheEntry, StoreError};

/// Pluggable durable storage for cache entries.
///
/// Implementations must be safe for concurrent use and must not perform
/// blocking I/O while holding an internal lock beyond a single operation.
///
/// # Decode failures
///
/// A record that exists but cannot be decoded is reported as
/// [`StoreError::Decode`]. Implementations must leave the record in place:
/// the manager downgrades the error to a miss and a subsequent successful
/// write repairs it.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Read an entry. Never mutates or removes, even if the entry is
    /// arbitrarily old.
    async fn read(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or overwrite an entry.
    async fn write(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    /// Remove a single entry (admin path). Returns whether it existed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError>;

    /// Remove every entry in a namespace (admin path). Returns the number
    /// removed.
    async fn clear_namespace(&self, namespace: &str) -> Result<u64, StoreError>;

    /// Total number of stored entries.
    async fn entry_count(&self) -> Result<u64, StoreError>;

    /// Operation counters for this store.
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Operation counters for an entry store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Reads that found an entry.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Successful writes.
    pub writes: u64,
    /// Successful deletes (including clears).
    pub deletes: u64,
    /// Reads that found an undecodable record.
    pub decode_errors: u64,
}

impl StoreStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
