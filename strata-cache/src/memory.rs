//! In-memory entry store for tests and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use strata_core::{CacheEntry, EntryKey, StoreError};

use crate::store::{EntryStore, StoreStats};

/// HashMap-backed [`EntryStore`].
///
/// Durability is the caller's problem here - this backend exists for tests
/// and for deployments where the durable tier lives elsewhere. Semantics
/// (read never removes, delete/clear are the only removal paths) match the
/// LMDB backend exactly.
#[derive(Default)]
pub struct MemoryEntryStore {
    entries: RwLock<HashMap<EntryKey, CacheEntry>>,
    stats: RwLock<StoreStats>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_stats<F: FnOnce(&mut StoreStats)>(&self, f: F) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn read(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Env {
            reason: "entry map lock poisoned".to_string(),
        })?;
        let found = entries.get(&EntryKey::new(namespace, key)).cloned();

        match &found {
            Some(_) => self.with_stats(|s| s.hits += 1),
            None => self.with_stats(|s| s.misses += 1),
        }
        Ok(found)
    }

    async fn write(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Env {
            reason: "entry map lock poisoned".to_string(),
        })?;
        entries.insert(entry.entry_key(), entry.clone());
        drop(entries);

        self.with_stats(|s| s.writes += 1);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Env {
            reason: "entry map lock poisoned".to_string(),
        })?;
        let removed = entries.remove(&EntryKey::new(namespace, key)).is_some();
        drop(entries);

        if removed {
            self.with_stats(|s| s.deletes += 1);
        }
        Ok(removed)
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Env {
            reason: "entry map lock poisoned".to_string(),
        })?;
        let before = entries.len();
        entries.retain(|entry_key, _| entry_key.namespace != namespace);
        let removed = (before - entries.len()) as u64;
        drop(entries);

        self.with_stats(|s| s.deletes += removed);
        Ok(removed)
    }

    async fn entry_count(&self) -> Result<u64, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Env {
            reason: "entry map lock poisoned".to_string(),
        })?;
        Ok(entries.len() as u64)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let store = MemoryEntryStore::new();
        let entry = CacheEntry::new("sentiment", "AAPL", json!({"score": 0.7}));

        store.write(&entry).await.expect("write should succeed");
        let read = store
            .read("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("entry should be present");
        assert_eq!(read, entry);
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let store = MemoryEntryStore::new();
        let read = store
            .read("sentiment", "missing")
            .await
            .expect("read should succeed");
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_repeated_reads_never_remove() {
        let store = MemoryEntryStore::new();
        let old = CacheEntry::with_cached_at(
            "sentiment",
            "AAPL",
            json!("ancient"),
            chrono::Utc::now() - chrono::Duration::days(365),
        );
        store.write(&old).await.expect("write should succeed");

        for _ in 0..100 {
            let read = store
                .read("sentiment", "AAPL")
                .await
                .expect("read should succeed");
            assert!(read.is_some());
        }
        assert_eq!(store.entry_count().await.expect("count should succeed"), 1);
    }

    #[tokio::test]
    async fn test_delete_removes() {
        let store = MemoryEntryStore::new();
        store
            .write(&CacheEntry::new("sentiment", "AAPL", json!(1)))
            .await
            .expect("write should succeed");

        assert!(store.delete("sentiment", "AAPL").await.expect("delete should succeed"));
        assert!(!store.delete("sentiment", "AAPL").await.expect("delete should succeed"));
        assert_eq!(store.entry_count().await.expect("count should succeed"), 0);
    }

    #[tokio::test]
    async fn test_clear_namespace_is_scoped() {
        let store = MemoryEntryStore::new();
        for key in ["a", "b", "c"] {
            store
                .write(&CacheEntry::new("sentiment", key, json!(key)))
                .await
                .expect("write should succeed");
        }
        store
            .write(&CacheEntry::new("indicators", "gdp", json!(2.1)))
            .await
            .expect("write should succeed");

        let removed = store
            .clear_namespace("sentiment")
            .await
            .expect("clear should succeed");
        assert_eq!(removed, 3);
        assert_eq!(store.entry_count().await.expect("count should succeed"), 1);
        assert!(store
            .read("indicators", "gdp")
            .await
            .expect("read should succeed")
            .is_some());
    }

    #[tokio::test]
    async fn test_stats_track_operations() {
        let store = MemoryEntryStore::new();
        store
            .write(&CacheEntry::new("ns", "k", json!(1)))
            .await
            .expect("write should succeed");

        let _ = store.read("ns", "k").await;
        let _ = store.read("ns", "k").await;
        let _ = store.read("ns", "missing").await;

        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 0.001);
    }
}
