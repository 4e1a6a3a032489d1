//! Unified health reporting types
//!
//! Types describing cache health for operational visibility. The score
//! derivation itself lives with the metrics registry in `strata-cache`;
//! this module only defines the shared shapes so collaborators (API layer,
//! report senders) can consume snapshots without depending on the engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health status for the cache or one of its namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Hit rates and error rates are within targets
    Healthy,
    /// Operational but outside targets
    Degraded,
    /// Serving mostly misses or failing origins
    Critical,
}

impl HealthStatus {
    /// Map a 0-100 health score onto a qualitative status.
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=100 => Self::Healthy,
            50..=79 => Self::Degraded,
            _ => Self::Critical,
        }
    }
}

/// Entry-age distribution observed at read time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeHistogram {
    pub under_1m: u64,
    pub under_5m: u64,
    pub under_1h: u64,
    pub under_24h: u64,
    pub over_24h: u64,
}

impl AgeHistogram {
    /// Index of the bucket an age falls into (0..5).
    pub fn bucket_index(age: Duration) -> usize {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 3600;
        const DAY: u64 = 86400;
        match age.as_secs() {
            s if s < MINUTE => 0,
            s if s < 5 * MINUTE => 1,
            s if s < HOUR => 2,
            s if s < DAY => 3,
            _ => 4,
        }
    }

    /// Total observations across all buckets.
    pub fn total(&self) -> u64 {
        self.under_1m + self.under_5m + self.under_1h + self.under_24h + self.over_24h
    }
}

/// Per-namespace counters and derived rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceHealth {
    pub namespace: String,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub stale_reads: u64,
    pub origin_errors: u64,
    pub decode_errors: u64,
    pub refresh_successes: u64,
    pub refresh_failures: u64,
    /// (l1_hits + l2_hits) / lookups, 0.0 when no lookups yet.
    pub hit_rate: f64,
    pub age_histogram: AgeHistogram,
}

impl NamespaceHealth {
    /// Total lookups observed for this namespace.
    pub fn lookups(&self) -> u64 {
        self.l1_hits + self.l2_hits + self.misses
    }

    /// Fraction of refresh attempts that failed, 0.0 when none ran.
    pub fn refresh_failure_ratio(&self) -> f64 {
        let total = self.refresh_successes + self.refresh_failures;
        if total == 0 {
            0.0
        } else {
            self.refresh_failures as f64 / total as f64
        }
    }
}

/// Point-in-time view of overall cache health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// 0-100, derived from hit rates and error rates.
    pub score: u8,
    pub status: HealthStatus,
    pub namespaces: Vec<NamespaceHealth>,
    /// Actionable operator guidance, empty when healthy.
    pub recommendations: Vec<String>,
}
