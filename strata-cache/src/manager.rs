//! Tiered cache manager.
//!
//! Orchestrates the L1 -> L2 -> origin lookup path, the always-serve
//! staleness policy, and deduped fire-and-forget background refreshes.
//!
//! # Read path
//!
//! 1. L1 hit (fresh or within the grace window): return immediately.
//!    Staleness against the namespace's refresh threshold is evaluated on
//!    every hit; stale hits additionally schedule a background refresh.
//! 2. L2 hit: populate L1, return the value regardless of staleness, and
//!    schedule a deduped background refresh when stale and allowed by
//!    policy. Store read/decode failures downgrade to a miss so a storage
//!    hiccup never causes total unavailability.
//! 3. Total miss: fetch synchronously through the namespace's resilient
//!    origin, write through L2 then L1.
//!
//! # Background refresh
//!
//! Refreshes are spawned as detached tasks that never block or fail the
//! read that triggered them. An in-flight marker per `(namespace, key)`
//! guarantees at most one concurrent refresh per key. Before committing a
//! refresh result, the stored entry is re-read: if a strictly newer write
//! landed meanwhile, the refresh result is discarded - an explicit write
//! always wins the race.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use strata_core::policy::DEFAULT_MAX_L1_ENTRIES;
use strata_core::{
    CacheEntry, CacheError, EntryKey, HealthSnapshot, NamespacePolicy, OriginError, StrataResult,
};
use strata_origin::ResilientOrigin;

use crate::constants::MAX_TRACKED_KEYS;
use crate::hot::HotCache;
use crate::metrics::MetricsRegistry;
use crate::promotion::AccessTracker;
use crate::read::{CacheSource, CachedValue, ReadMetadata};
use crate::store::EntryStore;

struct NamespaceState {
    policy: NamespacePolicy,
    origin: Option<Arc<ResilientOrigin>>,
}

pub(crate) struct CacheInner<S: EntryStore> {
    pub(crate) store: Arc<S>,
    pub(crate) hot: HotCache,
    namespaces: RwLock<HashMap<String, NamespaceState>>,
    in_flight: Arc<Mutex<HashSet<EntryKey>>>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) tracker: Arc<AccessTracker>,
}

impl<S: EntryStore> CacheInner<S> {
    pub(crate) fn policy_of(&self, namespace: &str) -> Option<NamespacePolicy> {
        self.namespaces
            .read()
            .ok()?
            .get(namespace)
            .map(|state| state.policy.clone())
    }
}

/// Clears the in-flight marker when a refresh task finishes, however it
/// finishes.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<EntryKey>>>,
    key: EntryKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}

/// The public face of the cache engine.
///
/// Cheap to clone; clones share tiers, policies, and metrics. Construct one
/// instance per store and inject it into request handlers - the engine is
/// deliberately not a module-level singleton so tests can run isolated
/// instances side by side.
pub struct TieredCache<S: EntryStore> {
    pub(crate) inner: Arc<CacheInner<S>>,
}

impl<S: EntryStore> Clone for TieredCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: EntryStore + 'static> TieredCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                hot: HotCache::new(DEFAULT_MAX_L1_ENTRIES),
                namespaces: RwLock::new(HashMap::new()),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                metrics: Arc::new(MetricsRegistry::new()),
                tracker: Arc::new(AccessTracker::new(MAX_TRACKED_KEYS)),
            }),
        }
    }

    /// Install a namespace policy without an origin. Reads in this
    /// namespace serve cached data only; total misses return `None`.
    pub fn configure(&self, policy: NamespacePolicy) {
        self.install(policy, None);
    }

    /// Install a namespace policy together with the origin used for
    /// synchronous miss fills and background refreshes.
    pub fn configure_with_origin(&self, policy: NamespacePolicy, origin: Arc<ResilientOrigin>) {
        self.install(policy, Some(origin));
    }

    fn install(&self, policy: NamespacePolicy, origin: Option<Arc<ResilientOrigin>>) {
        self.inner
            .hot
            .set_namespace_bound(&policy.namespace, policy.max_l1_entries);
        if let Ok(mut namespaces) = self.inner.namespaces.write() {
            tracing::info!(
                namespace = %policy.namespace,
                l1_ttl_secs = policy.l1_ttl.as_secs(),
                refresh_threshold_secs = policy.l2_refresh_threshold.as_secs(),
                background_refresh = policy.background_refresh_enabled,
                has_origin = origin.is_some(),
                "Namespace configured"
            );
            namespaces.insert(policy.namespace.clone(), NamespaceState { policy, origin });
        }
    }

    fn namespace_state(
        &self,
        namespace: &str,
    ) -> StrataResult<(NamespacePolicy, Option<Arc<ResilientOrigin>>)> {
        let namespaces = self
            .inner
            .namespaces
            .read()
            .map_err(|_| CacheError::NamespaceNotConfigured {
                namespace: namespace.to_string(),
            })?;
        namespaces
            .get(namespace)
            .map(|state| (state.policy.clone(), state.origin.clone()))
            .ok_or_else(|| CacheError::NamespaceNotConfigured {
                namespace: namespace.to_string(),
            })
    }

    /// The metrics registry backing [`Self::health_snapshot`].
    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.inner.metrics)
    }

    /// Derive the current health snapshot.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.inner.metrics.health_snapshot()
    }

    /// Number of hot-tier entries resident for a namespace.
    pub fn l1_entry_count(&self, namespace: &str) -> usize {
        self.inner.hot.namespace_len(namespace)
    }

    /// Sweep expired hot-tier entries. Returns the number evicted.
    pub fn cleanup_l1(&self) -> usize {
        self.inner.hot.cleanup()
    }

    /// Read a value, deserializing the payload into `T`.
    ///
    /// Returns `Ok(None)` only when the key has never been successfully
    /// cached and the namespace has no origin to fetch it from.
    pub async fn read<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> StrataResult<Option<CachedValue<T>>> {
        match self.read_value(namespace, key, None).await? {
            Some(cached) => Ok(Some(decode_payload(namespace, key, cached)?)),
            None => Ok(None),
        }
    }

    /// Read with an explicit fallback origin, returning the value directly.
    ///
    /// Convenience for consumers that own their origin function: behaves
    /// like [`Self::read`] but fetches through `origin` on a total miss
    /// even when the namespace has no registered origin.
    pub async fn get_or_refresh<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
        origin: &Arc<ResilientOrigin>,
    ) -> StrataResult<T> {
        match self.read_value(namespace, key, Some(origin)).await? {
            Some(cached) => Ok(decode_payload(namespace, key, cached)?.into_value()),
            None => Err(CacheError::MissAndOriginFailed {
                namespace: namespace.to_string(),
                key: key.to_string(),
                source: OriginError::Failed {
                    origin: origin.origin_id().to_string(),
                    reason: "origin produced no value".to_string(),
                },
            }),
        }
    }

    async fn read_value(
        &self,
        namespace: &str,
        key: &str,
        origin_override: Option<&Arc<ResilientOrigin>>,
    ) -> StrataResult<Option<CachedValue<Value>>> {
        let (policy, registered) = self.namespace_state(namespace)?;
        let origin = origin_override.cloned().or(registered);
        let metrics = &self.inner.metrics;

        // Hot tier.
        if let Some(hot) = self.inner.hot.get(namespace, key) {
            let age = age_of(hot.cached_at);
            let stale = age > policy.l2_refresh_threshold;
            if stale {
                self.maybe_schedule_refresh(&policy, origin.as_ref(), namespace, key, hot.cached_at);
            }
            metrics.record_l1_hit(namespace, age, stale);
            return Ok(Some(CachedValue::new(
                hot.payload,
                ReadMetadata {
                    source: CacheSource::L1,
                    age,
                    stale,
                },
            )));
        }

        // Durable tier.
        match self.inner.store.read(namespace, key).await {
            Ok(Some(entry)) => {
                let age = entry.age();
                let stale = entry.is_stale(policy.l2_refresh_threshold);
                self.inner.tracker.record(namespace, key);
                self.inner.hot.insert(
                    namespace,
                    key,
                    entry.payload.clone(),
                    entry.cached_at,
                    policy.l1_ttl,
                    policy.l1_grace_period,
                );
                if stale {
                    self.maybe_schedule_refresh(
                        &policy,
                        origin.as_ref(),
                        namespace,
                        key,
                        entry.cached_at,
                    );
                }
                metrics.record_l2_hit(namespace, age, stale);
                return Ok(Some(CachedValue::new(
                    entry.payload,
                    ReadMetadata {
                        source: CacheSource::L2,
                        age,
                        stale,
                    },
                )));
            }
            Ok(None) => {}
            Err(error) if error.is_decode() => {
                metrics.record_decode_error(namespace);
                tracing::warn!(
                    namespace,
                    key,
                    error = %error,
                    "Stored record unreadable, treating as miss"
                );
            }
            Err(error) => {
                tracing::error!(
                    namespace,
                    key,
                    error = %error,
                    "Store read failed, falling through to origin"
                );
            }
        }

        // Total miss.
        metrics.record_miss(namespace);
        let Some(origin) = origin else {
            return Ok(None);
        };

        let payload = origin.fetch(key).await.map_err(|source| {
            metrics.record_origin_error(namespace);
            CacheError::MissAndOriginFailed {
                namespace: namespace.to_string(),
                key: key.to_string(),
                source,
            }
        })?;

        let entry = CacheEntry::new(namespace, key, payload.clone());
        self.inner.store.write(&entry).await?;
        self.inner.hot.insert(
            namespace,
            key,
            payload.clone(),
            entry.cached_at,
            policy.l1_ttl,
            policy.l1_grace_period,
        );

        Ok(Some(CachedValue::new(
            payload,
            ReadMetadata {
                source: CacheSource::Origin,
                age: Duration::ZERO,
                stale: false,
            },
        )))
    }

    /// Write-through: L2 first (with `cached_at = now`), then L1.
    pub async fn write<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> StrataResult<()> {
        let (policy, _) = self.namespace_state(namespace)?;
        let payload = serde_json::to_value(value).map_err(|e| CacheError::PayloadType {
            namespace: namespace.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let entry = CacheEntry::new(namespace, key, payload.clone());
        self.inner.store.write(&entry).await?;
        self.inner.hot.insert(
            namespace,
            key,
            payload,
            entry.cached_at,
            policy.l1_ttl,
            policy.l1_grace_period,
        );
        Ok(())
    }

    /// Remove a key from both tiers. The only legitimate way to purge a
    /// single durable entry.
    pub async fn delete(&self, namespace: &str, key: &str) -> StrataResult<bool> {
        let deleted = self.inner.store.delete(namespace, key).await?;
        self.inner.hot.remove(namespace, key);
        self.inner.tracker.forget(namespace, key);
        Ok(deleted)
    }

    /// Remove every entry in a namespace from both tiers (admin path).
    pub async fn clear_namespace(&self, namespace: &str) -> StrataResult<u64> {
        let deleted = self.inner.store.clear_namespace(namespace).await?;
        self.inner.hot.clear_namespace(namespace);
        Ok(deleted)
    }

    fn maybe_schedule_refresh(
        &self,
        policy: &NamespacePolicy,
        origin: Option<&Arc<ResilientOrigin>>,
        namespace: &str,
        key: &str,
        base_cached_at: DateTime<Utc>,
    ) {
        if !policy.background_refresh_enabled {
            return;
        }
        let Some(origin) = origin else {
            return;
        };
        if !policy.refresh_window.contains(Utc::now()) {
            tracing::trace!(namespace, key, "Refresh deferred: outside refresh window");
            return;
        }

        let entry_key = EntryKey::new(namespace, key);
        {
            let Ok(mut in_flight) = self.inner.in_flight.lock() else {
                return;
            };
            if !in_flight.insert(entry_key.clone()) {
                // Another refresh for this key is already running.
                return;
            }
        }

        let guard = InFlightGuard {
            set: Arc::clone(&self.inner.in_flight),
            key: entry_key.clone(),
        };
        let inner = Arc::clone(&self.inner);
        let origin = Arc::clone(origin);

        tokio::spawn(async move {
            let _guard = guard;
            refresh_entry(inner, origin, entry_key, base_cached_at).await;
        });
    }
}

/// Background refresh body. Failures are logged and counted, never
/// surfaced to the read that scheduled this.
async fn refresh_entry<S: EntryStore>(
    inner: Arc<CacheInner<S>>,
    origin: Arc<ResilientOrigin>,
    entry_key: EntryKey,
    base_cached_at: DateTime<Utc>,
) {
    let namespace = entry_key.namespace.as_str();
    let key = entry_key.key.as_str();
    let attempt_at = Utc::now();

    match origin.fetch(key).await {
        Ok(payload) => match inner.store.read(namespace, key).await {
            Ok(Some(mut entry)) => {
                if entry.cached_at > base_cached_at {
                    tracing::debug!(
                        namespace,
                        key,
                        "Newer write landed during refresh, discarding result"
                    );
                    return;
                }
                entry.record_refresh_success(payload, Utc::now());
                match inner.store.write(&entry).await {
                    Ok(()) => {
                        if let Some(policy) = inner.policy_of(namespace) {
                            inner.hot.insert(
                                namespace,
                                key,
                                entry.payload.clone(),
                                entry.cached_at,
                                policy.l1_ttl,
                                policy.l1_grace_period,
                            );
                        }
                        inner.metrics.record_refresh_success(namespace);
                        tracing::debug!(namespace, key, "Background refresh committed");
                    }
                    Err(error) => {
                        inner.metrics.record_refresh_failure(namespace);
                        tracing::warn!(
                            namespace,
                            key,
                            error = %error,
                            "Background refresh write failed"
                        );
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(
                    namespace,
                    key,
                    "Entry deleted during refresh, discarding result"
                );
            }
            Err(error) => {
                inner.metrics.record_refresh_failure(namespace);
                tracing::warn!(
                    namespace,
                    key,
                    error = %error,
                    "Could not re-read entry before refresh commit"
                );
            }
        },
        Err(error) => {
            inner.metrics.record_refresh_failure(namespace);
            inner.metrics.record_origin_error(namespace);
            tracing::warn!(
                namespace,
                key,
                origin = origin.origin_id(),
                error = %error,
                "Background refresh failed, keeping stale value"
            );
            // Stamp the attempt so operators can see the key is being
            // tried, but never touch payload or cached_at, and never
            // clobber a write that landed while we were fetching.
            if let Ok(Some(mut entry)) = inner.store.read(namespace, key).await {
                if entry.cached_at <= base_cached_at {
                    entry.record_refresh_failure(attempt_at);
                    if let Err(error) = inner.store.write(&entry).await {
                        tracing::debug!(
                            namespace,
                            key,
                            error = %error,
                            "Could not stamp refresh attempt"
                        );
                    }
                }
            }
        }
    }
}

fn age_of(cached_at: DateTime<Utc>) -> Duration {
    let now = Utc::now();
    if now > cached_at {
        (now - cached_at).to_std().unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

fn decode_payload<T: DeserializeOwned>(
    namespace: &str,
    key: &str,
    cached: CachedValue<Value>,
) -> StrataResult<CachedValue<T>> {
    let (value, metadata) = cached.into_parts();
    match serde_json::from_value(value) {
        Ok(decoded) => Ok(CachedValue::new(decoded, metadata)),
        Err(e) => Err(CacheError::PayloadType {
            namespace: namespace.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        }),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEntryStore;
    use crate::store::StoreStats;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use strata_core::{FnOrigin, Origin, RefreshWindow, StoreError};
    use strata_origin::breaker::CircuitBreakerConfig;
    use strata_origin::retry::RetryPolicy;
    use strata_origin::ResilientOriginConfig;

    fn fast_policy(namespace: &str) -> NamespacePolicy {
        NamespacePolicy::new(namespace)
            .with_l1_ttl(Duration::from_secs(60))
            .with_l1_grace_period(Duration::from_secs(10))
            .with_refresh_threshold(Duration::from_secs(60))
    }

    fn guarded(origin: Arc<dyn Origin>) -> Arc<ResilientOrigin> {
        Arc::new(ResilientOrigin::new(
            origin,
            ResilientOriginConfig {
                timeout: Duration::from_millis(500),
                retry: RetryPolicy {
                    max_attempts: 1,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    rate_limit_multiplier: 2,
                },
                breaker: CircuitBreakerConfig {
                    failure_threshold: 1000,
                    success_threshold: 1,
                    cool_down: Duration::from_millis(10),
                },
            },
        ))
    }

    fn counting_origin(value: Value, calls: Arc<AtomicU32>) -> Arc<ResilientOrigin> {
        guarded(Arc::new(FnOrigin::new("test-origin", move |_key: String| {
            let calls = Arc::clone(&calls);
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
        })))
    }

    fn failing_origin(calls: Arc<AtomicU32>) -> Arc<ResilientOrigin> {
        guarded(Arc::new(FnOrigin::new("down-origin", move |_key: String| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OriginError::Failed {
                    origin: "down-origin".to_string(),
                    reason: "permanently failing".to_string(),
                })
            }
        })))
    }

    async fn seed_stale_entry(store: &MemoryEntryStore, namespace: &str, key: &str, value: Value) {
        let entry = CacheEntry::with_cached_at(
            namespace,
            key,
            value,
            Utc::now() - chrono::Duration::seconds(600),
        );
        store.write(&entry).await.expect("seed write should succeed");
    }

    async fn wait_until<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if condition().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition().await
    }

    #[tokio::test]
    async fn test_unconfigured_namespace_errors() {
        let cache = TieredCache::new(Arc::new(MemoryEntryStore::new()));
        let result = cache.read::<String>("nowhere", "k").await;
        assert!(matches!(
            result,
            Err(CacheError::NamespaceNotConfigured { .. })
        ));
    }

    #[tokio::test]
    async fn test_miss_without_origin_returns_none() {
        let cache = TieredCache::new(Arc::new(MemoryEntryStore::new()));
        cache.configure(fast_policy("sentiment"));

        let read = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed");
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_hits_l1() {
        let cache = TieredCache::new(Arc::new(MemoryEntryStore::new()));
        cache.configure(fast_policy("sentiment"));

        cache
            .write("sentiment", "AAPL", &"bullish")
            .await
            .expect("write should succeed");

        let read = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("value should be present");
        assert_eq!(read.value(), "bullish");
        assert_eq!(read.source(), CacheSource::L1);
        assert!(!read.is_stale());
    }

    #[tokio::test]
    async fn test_l2_hit_repopulates_l1() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        cache.configure(fast_policy("sentiment"));

        cache
            .write("sentiment", "AAPL", &"bullish")
            .await
            .expect("write should succeed");
        cache.inner.hot.remove("sentiment", "AAPL");

        let read = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("value should be present");
        assert_eq!(read.source(), CacheSource::L2);

        let again = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("value should be present");
        assert_eq!(again.source(), CacheSource::L1);
    }

    #[tokio::test]
    async fn test_total_miss_fetches_through_origin() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        let calls = Arc::new(AtomicU32::new(0));
        cache.configure_with_origin(
            fast_policy("sentiment"),
            counting_origin(json!("fetched"), Arc::clone(&calls)),
        );

        let read = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("value should be present");
        assert_eq!(read.value(), "fetched");
        assert_eq!(read.source(), CacheSource::Origin);
        assert!(!read.is_stale());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.entry_count().await.expect("count should succeed"), 1);

        // Now resident: no further origin calls.
        let again = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("value should be present");
        assert_eq!(again.source(), CacheSource::L1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_total_miss_with_failing_origin_errors() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        let calls = Arc::new(AtomicU32::new(0));
        cache.configure_with_origin(fast_policy("sentiment"), failing_origin(Arc::clone(&calls)));

        let result = cache.read::<String>("sentiment", "AAPL").await;
        assert!(matches!(
            result,
            Err(CacheError::MissAndOriginFailed { .. })
        ));
        assert_eq!(store.entry_count().await.expect("count should succeed"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_always_serve_with_permanently_failing_origin() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        let calls = Arc::new(AtomicU32::new(0));
        cache.configure_with_origin(fast_policy("sentiment"), failing_origin(Arc::clone(&calls)));

        seed_stale_entry(&store, "sentiment", "AAPL", json!("last-known-good")).await;
        let original = store
            .read("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("seed should be present");

        let read = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("stale value should still serve");
        assert_eq!(read.value(), "last-known-good");
        assert!(read.is_stale());

        // Wait for the failed background refresh to stamp its attempt.
        let calls_for_wait = Arc::clone(&calls);
        assert!(
            wait_until(
                move || {
                    let calls = Arc::clone(&calls_for_wait);
                    async move { calls.load(Ordering::SeqCst) >= 1 }
                },
                Duration::from_secs(2)
            )
            .await,
            "background refresh should have been attempted"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let after = store
            .read("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("entry must never be deleted by a failed refresh");
        assert_eq!(after.payload, original.payload);
        assert_eq!(after.cached_at, original.cached_at);
        assert!(after.last_refresh_attempt_at.is_some());
        assert_eq!(store.entry_count().await.expect("count should succeed"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_refresh_advances_cached_at() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        let calls = Arc::new(AtomicU32::new(0));
        cache.configure_with_origin(
            fast_policy("sentiment"),
            counting_origin(json!("refreshed"), Arc::clone(&calls)),
        );

        seed_stale_entry(&store, "sentiment", "AAPL", json!("old")).await;
        let base = store
            .read("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("seed should be present")
            .cached_at;

        let read = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("value should be present");
        assert_eq!(read.value(), "old");
        assert!(read.is_stale());

        let store_for_wait = Arc::clone(&store);
        assert!(
            wait_until(
                move || {
                    let store = Arc::clone(&store_for_wait);
                    async move {
                        store
                            .read("sentiment", "AAPL")
                            .await
                            .ok()
                            .flatten()
                            .map(|e| e.payload == json!("refreshed"))
                            .unwrap_or(false)
                    }
                },
                Duration::from_secs(2)
            )
            .await,
            "background refresh should commit"
        );

        let after = store
            .read("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("entry should be present");
        assert!(after.cached_at > base);

        let next = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("value should be present");
        assert_eq!(next.value(), "refreshed");
        assert!(!next.is_stale());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stale_reads_trigger_one_refresh() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let slow_origin = guarded(Arc::new(FnOrigin::new("slow", move |_key: String| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!("refreshed"))
            }
        })));
        cache.configure_with_origin(fast_policy("sentiment"), slow_origin);

        seed_stale_entry(&store, "sentiment", "AAPL", json!("old")).await;

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .read::<String>("sentiment", "AAPL")
                    .await
                    .expect("read should succeed")
                    .expect("value should be present")
                    .into_value()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.expect("task should not panic"), "old");
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "refresh dedupe must allow at most one origin call"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_refresh_window_defers_refresh() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        let calls = Arc::new(AtomicU32::new(0));

        // A window that never contains the current hour.
        use chrono::Timelike;
        let hour = Utc::now().hour();
        let closed_window = RefreshWindow::UtcHours {
            start: (hour + 2) % 24,
            end: (hour + 3) % 24,
        };
        cache.configure_with_origin(
            fast_policy("sentiment").with_refresh_window(closed_window),
            counting_origin(json!("refreshed"), Arc::clone(&calls)),
        );

        seed_stale_entry(&store, "sentiment", "AAPL", json!("old")).await;

        let read = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("value should be present");
        assert!(read.is_stale());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0, "refresh must be deferred");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disabled_background_refresh() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        let calls = Arc::new(AtomicU32::new(0));
        cache.configure_with_origin(
            fast_policy("sentiment").with_background_refresh(false),
            counting_origin(json!("refreshed"), Arc::clone(&calls)),
        );

        seed_stale_entry(&store, "sentiment", "AAPL", json!("old")).await;

        let read = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("value should be present");
        assert!(read.is_stale());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_racing_write_beats_refresh() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        let slow_origin = guarded(Arc::new(FnOrigin::new("slow", |_key: String| async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(json!("refresh-result"))
        })));
        cache.configure_with_origin(fast_policy("sentiment"), slow_origin);

        seed_stale_entry(&store, "sentiment", "AAPL", json!("old")).await;

        // Schedule the refresh, then land an explicit write while the
        // origin is still fetching.
        let _ = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed");
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache
            .write("sentiment", "AAPL", &"manual-write")
            .await
            .expect("write should succeed");

        tokio::time::sleep(Duration::from_millis(200)).await;

        let after = store
            .read("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("entry should be present");
        assert_eq!(
            after.payload,
            json!("manual-write"),
            "a racing write must win over the refresh result"
        );
    }

    #[tokio::test]
    async fn test_delete_purges_both_tiers() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        cache.configure(fast_policy("sentiment"));

        cache
            .write("sentiment", "AAPL", &"bullish")
            .await
            .expect("write should succeed");

        assert!(cache
            .delete("sentiment", "AAPL")
            .await
            .expect("delete should succeed"));
        assert_eq!(store.entry_count().await.expect("count should succeed"), 0);
        assert_eq!(cache.l1_entry_count("sentiment"), 0);
        assert!(cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .is_none());
    }

    #[tokio::test]
    async fn test_clear_namespace_purges_both_tiers() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        cache.configure(fast_policy("sentiment"));
        cache.configure(fast_policy("indicators"));

        for key in ["AAPL", "MSFT"] {
            cache
                .write("sentiment", key, &key)
                .await
                .expect("write should succeed");
        }
        cache
            .write("indicators", "gdp", &2.1)
            .await
            .expect("write should succeed");

        let removed = cache
            .clear_namespace("sentiment")
            .await
            .expect("clear should succeed");
        assert_eq!(removed, 2);
        assert_eq!(cache.l1_entry_count("sentiment"), 0);
        assert!(cache
            .read::<f64>("indicators", "gdp")
            .await
            .expect("read should succeed")
            .is_some());
    }

    #[tokio::test]
    async fn test_get_or_refresh_fills_and_then_serves_cached() {
        let store = Arc::new(MemoryEntryStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        cache.configure(fast_policy("sentiment"));

        let calls = Arc::new(AtomicU32::new(0));
        let origin = counting_origin(json!("fetched"), Arc::clone(&calls));

        let value: String = cache
            .get_or_refresh("sentiment", "AAPL", &origin)
            .await
            .expect("get_or_refresh should succeed");
        assert_eq!(value, "fetched");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let value: String = cache
            .get_or_refresh("sentiment", "AAPL", &origin)
            .await
            .expect("get_or_refresh should succeed");
        assert_eq!(value, "fetched");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second call must be a cache hit");
    }

    #[tokio::test]
    async fn test_payload_type_mismatch_is_typed_error() {
        let cache = TieredCache::new(Arc::new(MemoryEntryStore::new()));
        cache.configure(fast_policy("sentiment"));

        cache
            .write("sentiment", "AAPL", &"not-a-number")
            .await
            .expect("write should succeed");

        let result = cache.read::<u64>("sentiment", "AAPL").await;
        assert!(matches!(result, Err(CacheError::PayloadType { .. })));
    }

    // ------------------------------------------------------------------
    // Store failure injection
    // ------------------------------------------------------------------

    struct FlakyStore {
        inner: MemoryEntryStore,
        fail_reads: AtomicBool,
        decode_errors: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryEntryStore::new(),
                fail_reads: AtomicBool::new(false),
                decode_errors: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl EntryStore for FlakyStore {
        async fn read(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Read {
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                    reason: "injected read failure".to_string(),
                });
            }
            if self.decode_errors.load(Ordering::SeqCst) {
                return Err(StoreError::Decode {
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                    reason: "injected decode failure".to_string(),
                });
            }
            self.inner.read(namespace, key).await
        }

        async fn write(&self, entry: &CacheEntry) -> Result<(), StoreError> {
            self.inner.write(entry).await
        }

        async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(namespace, key).await
        }

        async fn clear_namespace(&self, namespace: &str) -> Result<u64, StoreError> {
            self.inner.clear_namespace(namespace).await
        }

        async fn entry_count(&self) -> Result<u64, StoreError> {
            self.inner.entry_count().await
        }

        async fn stats(&self) -> Result<StoreStats, StoreError> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_store_read_error_falls_through_to_origin() {
        let store = Arc::new(FlakyStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        let calls = Arc::new(AtomicU32::new(0));
        cache.configure_with_origin(
            fast_policy("sentiment"),
            counting_origin(json!("fetched"), Arc::clone(&calls)),
        );

        store.fail_reads.store(true, Ordering::SeqCst);

        let read = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("a storage hiccup must not cause unavailability")
            .expect("value should come from the origin");
        assert_eq!(read.source(), CacheSource::Origin);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decode_error_is_a_miss_and_gets_repaired() {
        let store = Arc::new(FlakyStore::new());
        let cache = TieredCache::new(Arc::clone(&store));
        let calls = Arc::new(AtomicU32::new(0));
        cache.configure_with_origin(
            fast_policy("sentiment"),
            counting_origin(json!("repaired"), Arc::clone(&calls)),
        );

        // A record exists but is unreadable.
        seed_stale_entry(&store.inner, "sentiment", "AAPL", json!("corrupt")).await;
        store.decode_errors.store(true, Ordering::SeqCst);

        let read = cache
            .read::<String>("sentiment", "AAPL")
            .await
            .expect("decode failure must downgrade to a miss")
            .expect("origin should supply the value");
        assert_eq!(read.value(), "repaired");

        // The original record was never deleted; the write-through
        // replaced it.
        store.decode_errors.store(false, Ordering::SeqCst);
        let repaired = store
            .inner
            .read("sentiment", "AAPL")
            .await
            .expect("read should succeed")
            .expect("entry should be present");
        assert_eq!(repaired.payload, json!("repaired"));

        let health = cache
            .metrics()
            .namespace_health("sentiment")
            .expect("namespace should have metrics");
        assert_eq!(health.decode_errors, 1);
    }
}
