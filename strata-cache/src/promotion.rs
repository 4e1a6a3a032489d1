//! Promotion engine: warms frequently-accessed durable entries into L1.
//!
//! Access counts are observed at the L2 layer (every durable-tier hit) and
//! the top keys not already resident in the hot tier are warmed ahead of
//! organic demand, either on a periodic tick or on demand. This is purely
//! an optimization: its absence affects hit rate, never correctness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use strata_core::EntryKey;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::constants::{DEFAULT_PROMOTION_INTERVAL_SECS, DEFAULT_PROMOTION_TOP_N};
use crate::manager::TieredCache;
use crate::store::EntryStore;

#[derive(Debug, Clone, Copy)]
struct AccessRecord {
    count: u64,
    last_access: DateTime<Utc>,
}

/// Bounded per-key access counter.
///
/// When the bound is reached, the least-accessed (then least-recent) key
/// is dropped to make room, so the tracker can run indefinitely without
/// growing with the keyspace.
pub struct AccessTracker {
    max_tracked: usize,
    inner: RwLock<HashMap<EntryKey, AccessRecord>>,
}

impl AccessTracker {
    pub fn new(max_tracked: usize) -> Self {
        Self {
            max_tracked,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Record one L2 hit for `(namespace, key)`.
    pub fn record(&self, namespace: &str, key: &str) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        let entry_key = EntryKey::new(namespace, key);
        let now = Utc::now();

        if let Some(record) = inner.get_mut(&entry_key) {
            record.count += 1;
            record.last_access = now;
            return;
        }

        if inner.len() >= self.max_tracked {
            let coldest = inner
                .iter()
                .min_by_key(|(_, record)| (record.count, record.last_access))
                .map(|(key, _)| key.clone());
            if let Some(coldest) = coldest {
                inner.remove(&coldest);
            }
        }
        inner.insert(
            entry_key,
            AccessRecord {
                count: 1,
                last_access: now,
            },
        );
    }

    /// Drop tracking for a key (e.g. after it is deleted).
    pub fn forget(&self, namespace: &str, key: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.remove(&EntryKey::new(namespace, key));
        }
    }

    /// The `n` hottest keys, most-accessed first, recency breaking ties.
    pub fn top(&self, n: usize) -> Vec<EntryKey> {
        let Ok(inner) = self.inner.read() else {
            return Vec::new();
        };
        let mut records: Vec<(&EntryKey, &AccessRecord)> = inner.iter().collect();
        records.sort_by(|a, b| {
            b.1.count
                .cmp(&a.1.count)
                .then(b.1.last_access.cmp(&a.1.last_access))
        });
        records.into_iter().take(n).map(|(key, _)| key.clone()).collect()
    }

    /// Number of keys currently tracked.
    pub fn tracked_len(&self) -> usize {
        self.inner.read().map(|inner| inner.len()).unwrap_or(0)
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the promotion background task.
#[derive(Debug, Clone)]
pub struct PromotionConfig {
    /// How often to run a promotion cycle (default: 5 minutes).
    pub interval: Duration,
    /// How many keys to warm per cycle (default: 32).
    pub top_n: usize,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_PROMOTION_INTERVAL_SECS),
            top_n: DEFAULT_PROMOTION_TOP_N,
        }
    }
}

impl PromotionConfig {
    /// Create PromotionConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_PROMOTION_INTERVAL_SECS`: Cycle interval (default: 300)
    /// - `STRATA_PROMOTION_TOP_N`: Keys warmed per cycle (default: 32)
    pub fn from_env() -> Self {
        let interval = Duration::from_secs(
            std::env::var("STRATA_PROMOTION_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PROMOTION_INTERVAL_SECS),
        );

        let top_n = std::env::var("STRATA_PROMOTION_TOP_N")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PROMOTION_TOP_N);

        Self { interval, top_n }
    }

    /// Create a configuration for development/testing with a short cycle.
    pub fn development() -> Self {
        Self {
            interval: Duration::from_millis(20),
            top_n: 8,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Metrics for promotion cycles.
#[derive(Debug, Default)]
pub struct PromotionMetrics {
    /// Total cycles completed since startup
    pub cycles: AtomicU64,
    /// Total entries warmed into L1 since startup
    pub promoted: AtomicU64,
    /// Total expired/over-bound L1 entries swept since startup
    pub l1_evicted: AtomicU64,
}

impl PromotionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> PromotionSnapshot {
        PromotionSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            promoted: self.promoted.load(Ordering::Relaxed),
            l1_evicted: self.l1_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of promotion metrics at a point in time.
#[derive(Debug, Clone)]
pub struct PromotionSnapshot {
    pub cycles: u64,
    pub promoted: u64,
    pub l1_evicted: u64,
}

// ============================================================================
// ENGINE
// ============================================================================

impl<S: EntryStore + 'static> TieredCache<S> {
    /// Warm the `n` hottest non-resident keys into L1 from L2.
    ///
    /// Best-effort: keys whose namespace is unconfigured or whose read
    /// fails are skipped, keys no longer in the store are forgotten.
    /// Returns the number of entries warmed.
    pub async fn promote_top(&self, n: usize) -> u64 {
        // Over-fetch candidates since some will already be resident.
        let candidates = self.inner.tracker.top(n.saturating_mul(2));
        let mut promoted = 0u64;

        for candidate in candidates {
            if promoted >= n as u64 {
                break;
            }
            let namespace = candidate.namespace.as_str();
            let key = candidate.key.as_str();

            if self.inner.hot.contains_fresh(namespace, key) {
                continue;
            }
            let Some(policy) = self.inner.policy_of(namespace) else {
                continue;
            };

            match self.inner.store.read(namespace, key).await {
                Ok(Some(entry)) => {
                    self.inner.hot.insert(
                        namespace,
                        key,
                        entry.payload.clone(),
                        entry.cached_at,
                        policy.l1_ttl,
                        policy.l1_grace_period,
                    );
                    promoted += 1;
                }
                Ok(None) => {
                    self.inner.tracker.forget(namespace, key);
                }
                Err(error) => {
                    tracing::debug!(namespace, key, error = %error, "Promotion read failed");
                }
            }
        }

        promoted
    }
}

/// Background task that periodically sweeps L1 and warms hot keys.
///
/// Runs until the shutdown signal is received. Each cycle:
///
/// 1. Sweeps expired hot-tier entries (`cleanup`)
/// 2. Warms the top accessed keys from L2 into L1
///
/// # Example
///
/// ```ignore
/// use tokio::sync::watch;
///
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(promotion_task(
///     cache.clone(),
///     PromotionConfig::default(),
///     shutdown_rx,
/// ));
///
/// // On shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await.unwrap();
/// ```
pub async fn promotion_task<S: EntryStore + 'static>(
    cache: TieredCache<S>,
    config: PromotionConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<PromotionMetrics> {
    let metrics = Arc::new(PromotionMetrics::new());

    let mut tick = interval(config.interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_ms = config.interval.as_millis() as u64,
        top_n = config.top_n,
        "Promotion task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Promotion task shutting down");
                    break;
                }
            }

            _ = tick.tick() => {
                metrics.cycles.fetch_add(1, Ordering::Relaxed);

                let evicted = cache.cleanup_l1();
                metrics.l1_evicted.fetch_add(evicted as u64, Ordering::Relaxed);

                let promoted = cache.promote_top(config.top_n).await;
                metrics.promoted.fetch_add(promoted, Ordering::Relaxed);

                if promoted > 0 || evicted > 0 {
                    tracing::debug!(promoted, evicted, "Promotion cycle completed");
                } else {
                    tracing::trace!("Promotion cycle completed with nothing to do");
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        promoted = snapshot.promoted,
        l1_evicted = snapshot.l1_evicted,
        "Promotion task completed"
    );

    metrics
}

// ============================================================================
// TESTS
// ============================================================================
