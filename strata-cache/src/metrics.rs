//! Cache metrics and health scoring.
//!
//! Counters are plain atomics updated on the hot path; snapshots and the
//! derived 0-100 health score are computed on demand. Scoring penalizes
//! three signals: combined hit rate below target, failing background
//! refreshes, and origin errors. Namespaces with too few lookups to be
//! meaningful are scored as healthy until they have a sample.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use strata_core::{AgeHistogram, HealthSnapshot, HealthStatus, NamespaceHealth};

use crate::constants::{HEALTH_MIN_SAMPLE, HEALTH_TARGET_HIT_RATE};

#[derive(Debug, Default)]
struct NamespaceCounters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    stale_reads: AtomicU64,
    origin_errors: AtomicU64,
    decode_errors: AtomicU64,
    refresh_successes: AtomicU64,
    refresh_failures: AtomicU64,
    age_buckets: [AtomicU64; 5],
}

impl NamespaceCounters {
    fn observe_age(&self, age: Duration) {
        self.age_buckets[AgeHistogram::bucket_index(age)].fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, namespace: &str) -> NamespaceHealth {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = l1_hits + l2_hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (l1_hits + l2_hits) as f64 / lookups as f64
        };

        NamespaceHealth {
            namespace: namespace.to_string(),
            l1_hits,
            l2_hits,
            misses,
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            origin_errors: self.origin_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            hit_rate,
            age_histogram: AgeHistogram {
                under_1m: self.age_buckets[0].load(Ordering::Relaxed),
                under_5m: self.age_buckets[1].load(Ordering::Relaxed),
                under_1h: self.age_buckets[2].load(Ordering::Relaxed),
                under_24h: self.age_buckets[3].load(Ordering::Relaxed),
                over_24h: self.age_buckets[4].load(Ordering::Relaxed),
            },
        }
    }
}

/// Per-namespace cache counters with derived health reporting.
#[derive(Default)]
pub struct MetricsRegistry {
    namespaces: RwLock<HashMap<String, Arc<NamespaceCounters>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, namespace: &str) -> Arc<NamespaceCounters> {
        if let Ok(map) = self.namespaces.read() {
            if let Some(counters) = map.get(namespace) {
                return Arc::clone(counters);
            }
        }
        let mut map = match self.namespaces.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(map.entry(namespace.to_string()).or_default())
    }

    pub fn record_l1_hit(&self, namespace: &str, age: Duration, stale: bool) {
        let counters = self.counters(namespace);
        counters.l1_hits.fetch_add(1, Ordering::Relaxed);
        counters.observe_age(age);
        if stale {
            counters.stale_reads.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_l2_hit(&self, namespace: &str, age: Duration, stale: bool) {
        let counters = self.counters(namespace);
        counters.l2_hits.fetch_add(1, Ordering::Relaxed);
        counters.observe_age(age);
        if stale {
            counters.stale_reads.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_miss(&self, namespace: &str) {
        self.counters(namespace).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_origin_error(&self, namespace: &str) {
        self.counters(namespace)
            .origin_errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self, namespace: &str) {
        self.counters(namespace)
            .decode_errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_success(&self, namespace: &str) {
        self.counters(namespace)
            .refresh_successes
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_failure(&self, namespace: &str) {
        self.counters(namespace)
            .refresh_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot one namespace, if it has recorded anything.
    pub fn namespace_health(&self, namespace: &str) -> Option<NamespaceHealth> {
        let map = self.namespaces.read().ok()?;
        map.get(namespace).map(|c| c.snapshot(namespace))
    }

    /// Derive the overall health snapshot.
    ///
    /// The overall score is the lookup-weighted average of per-namespace
    /// scores, so a busy degraded namespace outweighs an idle healthy one.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let mut namespaces: Vec<NamespaceHealth> = match self.namespaces.read() {
            Ok(map) => map
                .iter()
                .map(|(name, counters)| counters.snapshot(name))
                .collect(),
            Err(_) => Vec::new(),
        };
        namespaces.sort_by(|a, b| a.namespace.cmp(&b.namespace));

        let mut recommendations = Vec::new();
        let mut weighted_score = 0.0f64;
        let mut total_lookups = 0u64;

        for health in &namespaces {
            let score = score_for(health);
            recommend(health, &mut recommendations);
            weighted_score += score as f64 * health.lookups() as f64;
            total_lookups += health.lookups();
        }

        let score = if total_lookups == 0 {
            100
        } else {
            (weighted_score / total_lookups as f64).round() as u8
        };

        HealthSnapshot {
            score,
            status: HealthStatus::from_score(score),
            namespaces,
            recommendations,
        }
    }
}

/// Score a single namespace from its counters.
fn score_for(health: &NamespaceHealth) -> u8 {
    let lookups = health.lookups();
    if lookups < HEALTH_MIN_SAMPLE {
        return 100;
    }

    let hit_penalty =
        ((HEALTH_TARGET_HIT_RATE - health.hit_rate).max(0.0) / HEALTH_TARGET_HIT_RATE) * 40.0;
    let refresh_penalty = health.refresh_failure_ratio() * 30.0;
    let origin_penalty = (health.origin_errors as f64 / lookups as f64).min(1.0) * 30.0;

    (100.0 - hit_penalty - refresh_penalty - origin_penalty)
        .clamp(0.0, 100.0)
        .round() as u8
}

/// Append operator guidance for one namespace.
fn recommend(health: &NamespaceHealth, out: &mut Vec<String>) {
    let lookups = health.lookups();
    if lookups < HEALTH_MIN_SAMPLE {
        return;
    }
    let ns = &health.namespace;

    if health.hit_rate < HEALTH_TARGET_HIT_RATE {
        out.push(format!(
            "Namespace {ns}: combined hit rate {:.0}% is below the {:.0}% target; consider widening l1_ttl or raising max_l1_entries",
            health.hit_rate * 100.0,
            HEALTH_TARGET_HIT_RATE * 100.0,
        ));
    }

    let refresh_ratio = health.refresh_failure_ratio();
    if refresh_ratio > 0.25 {
        out.push(format!(
            "Namespace {ns}: {:.0}% of background refreshes are failing; check origin health and circuit breaker state",
            refresh_ratio * 100.0,
        ));
    }

    let origin_rate = health.origin_errors as f64 / lookups as f64;
    if origin_rate > 0.1 {
        out.push(format!(
            "Namespace {ns}: origin errors on {:.0}% of lookups; the origin may be rate limiting or down",
            origin_rate * 100.0,
        ));
    }

    let stale_rate = health.stale_reads as f64 / lookups as f64;
    if stale_rate > 0.5 {
        out.push(format!(
            "Namespace {ns}: {:.0}% of reads served stale data; consider widening the refresh window or lowering l2_refresh_threshold",
            stale_rate * 100.0,
        ));
    }
}

// ============================================================================
// TESTS
// ============================================================================
