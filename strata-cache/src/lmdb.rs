//! LMDB-backed entry store.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the durable tier. The
//! database outlives the process and is never swept by age: records leave
//! only through the explicit delete/clear paths.
//!
//! # Key Format
//!
//! Keys encode as `[namespace bytes][0xFF][key bytes]`. The separator byte
//! cannot occur inside UTF-8 text, so the split is unambiguous, keys sort
//! namespace-first, and a namespace prefix scan covers exactly one
//! namespace.
//!
//! # Record Format
//!
//! `[cached_at millis: 8 bytes LE][attempt millis: 8 bytes LE][payload JSON]`
//! with `i64::MIN` in the attempt slot meaning "never attempted". A record
//! whose payload fails to parse is reported as a decode error and left in
//! place; the next successful write repairs it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use strata_core::{CacheEntry, StoreError};

use crate::store::{EntryStore, StoreStats};

/// Separator byte between namespace and key.
const SEPARATOR: u8 = 0xFF;

/// Sentinel for "no refresh attempt recorded".
const ATTEMPT_NONE: i64 = i64::MIN;

/// A namespace-scoped store key.
///
/// # Binary Format
///
/// `[namespace bytes][separator: 0xFF][key bytes]`. Keys are naturally
/// sorted by namespace first, so LMDB range scans can efficiently iterate
/// a single namespace's records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedKey {
    namespace: String,
    key: String,
}

impl NamespacedKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encode this key for LMDB storage.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.namespace.len() + 1 + self.key.len());
        bytes.extend_from_slice(self.namespace.as_bytes());
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.key.as_bytes());
        bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the separator is missing or either side is not
    /// valid UTF-8.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let split = bytes.iter().position(|b| *b == SEPARATOR)?;
        let namespace = std::str::from_utf8(&bytes[..split]).ok()?;
        let key = std::str::from_utf8(&bytes[split + 1..]).ok()?;
        Some(Self::new(namespace, key))
    }

    /// Prefix matching every key in a namespace.
    pub fn namespace_prefix(namespace: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(namespace.len() + 1);
        prefix.extend_from_slice(namespace.as_bytes());
        prefix.push(SEPARATOR);
        prefix
    }
}

/// Per-namespace read statistics.
#[derive(Debug, Default)]
struct NamespaceStatsInner {
    hits: u64,
    misses: u64,
    decode_errors: u64,
}

/// LMDB-backed [`EntryStore`].
pub struct LmdbEntryStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    namespace_stats: RwLock<HashMap<String, NamespaceStatsInner>>,
    global_stats: RwLock<StoreStats>,
}

impl LmdbEntryStore {
    /// Create a new LMDB entry store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&path).map_err(|e| StoreError::Env {
            reason: format!("failed to create store directory: {e}"),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| StoreError::Env {
            reason: format!("failed to open LMDB environment: {e}"),
        })?;

        let mut wtxn = env.write_txn().map_err(|e| StoreError::Env {
            reason: format!("failed to begin transaction: {e}"),
        })?;
        let db: Database<Bytes, Bytes> =
            env.create_database(&mut wtxn, None).map_err(|e| StoreError::Env {
                reason: format!("failed to open database: {e}"),
            })?;
        wtxn.commit().map_err(|e| StoreError::Env {
            reason: format!("failed to commit transaction: {e}"),
        })?;

        Ok(Self {
            env,
            db,
            namespace_stats: RwLock::new(HashMap::new()),
            global_stats: RwLock::new(StoreStats::default()),
        })
    }

    fn record_hit(&self, namespace: &str) {
        if let Ok(mut stats) = self.namespace_stats.write() {
            stats.entry(namespace.to_string()).or_default().hits += 1;
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self, namespace: &str) {
        if let Ok(mut stats) = self.namespace_stats.write() {
            stats.entry(namespace.to_string()).or_default().misses += 1;
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.misses += 1;
        }
    }

    fn record_decode_error(&self, namespace: &str) {
        if let Ok(mut stats) = self.namespace_stats.write() {
            stats.entry(namespace.to_string()).or_default().decode_errors += 1;
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.decode_errors += 1;
        }
    }

    /// Get read statistics for a single namespace.
    pub fn namespace_stats(&self, namespace: &str) -> StoreStats {
        if let Ok(stats) = self.namespace_stats.read() {
            if let Some(inner) = stats.get(namespace) {
                return StoreStats {
                    hits: inner.hits,
                    misses: inner.misses,
                    decode_errors: inner.decode_errors,
                    ..Default::default()
                };
            }
        }
        StoreStats::default()
    }

    /// Serialize an entry into the record format.
    fn encode_record(entry: &CacheEntry) -> Result<Vec<u8>, StoreError> {
        let payload = serde_json::to_vec(&entry.payload).map_err(|e| StoreError::Write {
            namespace: entry.namespace.clone(),
            key: entry.key.clone(),
            reason: format!("payload serialization failed: {e}"),
        })?;

        let attempt_millis = entry
            .last_refresh_attempt_at
            .map(|at| at.timestamp_millis())
            .unwrap_or(ATTEMPT_NONE);

        let mut record = Vec::with_capacity(16 + payload.len());
        record.extend_from_slice(&entry.cached_at.timestamp_millis().to_le_bytes());
        record.extend_from_slice(&attempt_millis.to_le_bytes());
        record.extend_from_slice(&payload);
        Ok(record)
    }

    /// Parse a record back into an entry.
    fn decode_record(
        namespace: &str,
        key: &str,
        bytes: &[u8],
    ) -> Result<CacheEntry, StoreError> {
        let decode_err = |reason: String| StoreError::Decode {
            namespace: namespace.to_string(),
            key: key.to_string(),
            reason,
        };

        if bytes.len() < 16 {
            return Err(decode_err(format!("record too short: {} bytes", bytes.len())));
        }

        let cached_millis = i64::from_le_bytes(
            bytes[0..8]
                .try_into()
                .map_err(|_| decode_err("invalid cached_at timestamp".to_string()))?,
        );
        let cached_at = DateTime::from_timestamp_millis(cached_millis)
            .ok_or_else(|| decode_err(format!("cached_at out of range: {cached_millis}")))?;

        let attempt_millis = i64::from_le_bytes(
            bytes[8..16]
                .try_into()
                .map_err(|_| decode_err("invalid attempt timestamp".to_string()))?,
        );
        let last_refresh_attempt_at = if attempt_millis == ATTEMPT_NONE {
            None
        } else {
            Some(
                DateTime::from_timestamp_millis(attempt_millis)
                    .ok_or_else(|| decode_err(format!("attempt out of range: {attempt_millis}")))?,
            )
        };

        let payload = serde_json::from_slice(&bytes[16..])
            .map_err(|e| decode_err(format!("payload parse failed: {e}")))?;

        Ok(CacheEntry {
            namespace: namespace.to_string(),
            key: key.to_string(),
            payload,
            cached_at,
            last_refresh_attempt_at,
        })
    }

    /// Collect all stored keys matching a prefix.
    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(|e| StoreError::Env {
            reason: format!("failed to begin read transaction: {e}"),
        })?;

        let mut keys = Vec::new();
        let iter = self.db.iter(&rtxn).map_err(|e| StoreError::Env {
            reason: format!("failed to iterate database: {e}"),
        })?;

        for result in iter {
            match result {
                Ok((key, _)) => {
                    if key.len() >= prefix.len() && &key[0..prefix.len()] == prefix {
                        keys.push(key.to_vec());
                    }
                }
                Err(_) => continue,
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl EntryStore for LmdbEntryStore {
    async fn read(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let encoded_key = NamespacedKey::new(namespace, key).encode();

        let rtxn = self.env.read_txn().map_err(|e| StoreError::Read {
            namespace: namespace.to_string(),
            key: key.to_string(),
            reason: format!("failed to begin read transaction: {e}"),
        })?;

        match self.db.get(&rtxn, &encoded_key) {
            Ok(Some(bytes)) => match Self::decode_record(namespace, key, bytes) {
                Ok(entry) => {
                    self.record_hit(namespace);
                    Ok(Some(entry))
                }
                Err(error) => {
                    self.record_decode_error(namespace);
                    Err(error)
                }
            },
            Ok(None) => {
                self.record_miss(namespace);
                Ok(None)
            }
            Err(e) => Err(StoreError::Read {
                namespace: namespace.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn write(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let encoded_key = NamespacedKey::new(&entry.namespace, &entry.key).encode();
        let record = Self::encode_record(entry)?;

        let write_err = |reason: String| StoreError::Write {
            namespace: entry.namespace.clone(),
            key: entry.key.clone(),
            reason,
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| write_err(format!("failed to begin transaction: {e}")))?;
        self.db
            .put(&mut wtxn, &encoded_key, &record)
            .map_err(|e| write_err(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| write_err(format!("failed to commit: {e}")))?;

        if let Ok(mut stats) = self.global_stats.write() {
            stats.writes += 1;
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
        let encoded_key = NamespacedKey::new(namespace, key).encode();

        let env_err = |reason: String| StoreError::Env { reason };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| env_err(format!("failed to begin transaction: {e}")))?;
        let deleted = self
            .db
            .delete(&mut wtxn, &encoded_key)
            .map_err(|e| env_err(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| env_err(format!("failed to commit: {e}")))?;

        if deleted {
            if let Ok(mut stats) = self.global_stats.write() {
                stats.deletes += 1;
            }
        }
        Ok(deleted)
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<u64, StoreError> {
        let prefix = NamespacedKey::namespace_prefix(namespace);
        let keys_to_delete = self.collect_keys_with_prefix(&prefix)?;

        let env_err = |reason: String| StoreError::Env { reason };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| env_err(format!("failed to begin transaction: {e}")))?;

        let mut deleted = 0u64;
        for key in &keys_to_delete {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| env_err(format!("failed to commit: {e}")))?;

        if let Ok(mut stats) = self.namespace_stats.write() {
            stats.remove(namespace);
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.deletes += deleted;
        }

        Ok(deleted)
    }

    async fn entry_count(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(|e| StoreError::Env {
            reason: format!("failed to begin read transaction: {e}"),
        })?;
        self.db.len(&rtxn).map_err(|e| StoreError::Env {
            reason: format!("failed to count entries: {e}"),
        })
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self
            .global_stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
