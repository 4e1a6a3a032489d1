//! In-process hot tier (L1).
//!
//! A bounded map in front of the durable entry store. Entries carry a TTL
//! plus a grace window: past the TTL they may still be served once more
//! while a background refresh is scheduled, avoiding a synchronous stall at
//! the TTL boundary. Eviction here is purely an L1 concern and never
//! touches L2 - the hot tier is a disposable projection of the durable
//! store.
//!
//! Recency is tracked per entry and namespaces are individually bounded;
//! inserting past the bound evicts the least-recently-used entry first.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// How an L1 lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1Hit {
    /// Within the TTL.
    Fresh,
    /// Past the TTL but within the grace window; the caller should
    /// schedule a background refresh alongside serving this.
    Grace,
}

/// A successful L1 lookup.
#[derive(Debug, Clone)]
pub struct HotRead {
    pub payload: Value,
    /// Data age timestamp carried over from the L2 entry.
    pub cached_at: DateTime<Utc>,
    pub hit: L1Hit,
}

struct HotEntry {
    payload: Value,
    cached_at: DateTime<Utc>,
    inserted_at: Instant,
    last_accessed: Instant,
    ttl: Duration,
    grace: Duration,
}

impl HotEntry {
    fn phase(&self, now: Instant) -> Option<L1Hit> {
        let elapsed = now.saturating_duration_since(self.inserted_at);
        if elapsed < self.ttl {
            Some(L1Hit::Fresh)
        } else if elapsed < self.ttl + self.grace {
            Some(L1Hit::Grace)
        } else {
            None
        }
    }
}

struct Shard {
    entries: HashMap<String, HotEntry>,
    max_entries: usize,
}

impl Shard {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
        }
    }

    fn evict_lru(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }
}

/// Bounded in-process cache with per-namespace LRU eviction.
pub struct HotCache {
    shards: RwLock<HashMap<String, Shard>>,
    default_max_entries: usize,
}

impl HotCache {
    pub fn new(default_max_entries: usize) -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            default_max_entries,
        }
    }

    /// Set (or change) the entry bound for a namespace, evicting down to
    /// the new bound if needed.
    pub fn set_namespace_bound(&self, namespace: &str, max_entries: usize) {
        let Ok(mut shards) = self.shards.write() else {
            return;
        };
        let shard = shards
            .entry(namespace.to_string())
            .or_insert_with(|| Shard::new(max_entries));
        shard.max_entries = max_entries;
        while shard.entries.len() > shard.max_entries {
            if !shard.evict_lru() {
                break;
            }
        }
    }

    /// Insert or replace an entry. Enforces the namespace bound by evicting
    /// the least-recently-used entry first.
    pub fn insert(
        &self,
        namespace: &str,
        key: &str,
        payload: Value,
        cached_at: DateTime<Utc>,
        ttl: Duration,
        grace: Duration,
    ) {
        let Ok(mut shards) = self.shards.write() else {
            return;
        };
        let default_max = self.default_max_entries;
        let shard = shards
            .entry(namespace.to_string())
            .or_insert_with(|| Shard::new(default_max));

        if !shard.entries.contains_key(key) {
            while shard.entries.len() >= shard.max_entries {
                if !shard.evict_lru() {
                    break;
                }
            }
        }

        let now = Instant::now();
        shard.entries.insert(
            key.to_string(),
            HotEntry {
                payload,
                cached_at,
                inserted_at: now,
                last_accessed: now,
                ttl,
                grace,
            },
        );
    }

    /// Look up an entry, bumping its recency.
    ///
    /// Entries past TTL+grace are removed and reported as a miss.
    pub fn get(&self, namespace: &str, key: &str) -> Option<HotRead> {
        let mut shards = self.shards.write().ok()?;
        let shard = shards.get_mut(namespace)?;
        let now = Instant::now();

        let phase = shard.entries.get(key).and_then(|entry| entry.phase(now));
        match phase {
            Some(hit) => {
                let entry = shard.entries.get_mut(key)?;
                entry.last_accessed = now;
                Some(HotRead {
                    payload: entry.payload.clone(),
                    cached_at: entry.cached_at,
                    hit,
                })
            }
            None => {
                shard.entries.remove(key);
                None
            }
        }
    }

    /// Whether the key is resident and within its TTL. Does not bump
    /// recency; used by the promotion engine to skip resident keys.
    pub fn contains_fresh(&self, namespace: &str, key: &str) -> bool {
        let Ok(shards) = self.shards.read() else {
            return false;
        };
        let now = Instant::now();
        shards
            .get(namespace)
            .and_then(|shard| shard.entries.get(key))
            .and_then(|entry| entry.phase(now))
            .is_some_and(|hit| hit == L1Hit::Fresh)
    }

    /// Remove a single entry. Returns whether it was present.
    pub fn remove(&self, namespace: &str, key: &str) -> bool {
        let Ok(mut shards) = self.shards.write() else {
            return false;
        };
        shards
            .get_mut(namespace)
            .map(|shard| shard.entries.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Drop all entries for a namespace. Returns the number removed.
    pub fn clear_namespace(&self, namespace: &str) -> usize {
        let Ok(mut shards) = self.shards.write() else {
            return 0;
        };
        shards
            .get_mut(namespace)
            .map(|shard| {
                let count = shard.entries.len();
                shard.entries.clear();
                count
            })
            .unwrap_or(0)
    }

    /// Sweep expired entries and enforce bounds. Returns the number evicted.
    pub fn cleanup(&self) -> usize {
        let Ok(mut shards) = self.shards.write() else {
            return 0;
        };
        let now = Instant::now();
        let mut evicted = 0;

        for shard in shards.values_mut() {
            let before = shard.entries.len();
            shard.entries.retain(|_, entry| entry.phase(now).is_some());
            evicted += before - shard.entries.len();

            while shard.entries.len() > shard.max_entries {
                if !shard.evict_lru() {
                    break;
                }
                evicted += 1;
            }
        }

        evicted
    }

    /// Number of resident entries in a namespace.
    pub fn namespace_len(&self, namespace: &str) -> usize {
        self.shards
            .read()
            .ok()
            .and_then(|shards| shards.get(namespace).map(|shard| shard.entries.len()))
            .unwrap_or(0)
    }

    /// Total resident entries across namespaces.
    pub fn total_entries(&self) -> usize {
        self.shards
            .read()
            .ok()
            .map(|shards| shards.values().map(|shard| shard.entries.len()).sum())
            .unwrap_or(0)
    }
}
