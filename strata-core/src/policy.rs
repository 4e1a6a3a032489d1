//! Per-namespace cache policy.
//!
//! A [`NamespacePolicy`] is installed at startup via the cache manager's
//! `configure` call and is not mutable at runtime per-entry. The policy
//! governs the hot tier's TTL and bound, when an L2 entry counts as stale,
//! and whether/when background refreshes may run.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default hot-tier TTL (5 minutes).
pub const DEFAULT_L1_TTL_SECS: u64 = 300;

/// Default grace window for serving an L1 entry past its TTL (30 seconds).
pub const DEFAULT_L1_GRACE_PERIOD_SECS: u64 = 30;

/// Default age at which a durable entry triggers a background refresh (1 hour).
pub const DEFAULT_L2_REFRESH_THRESHOLD_SECS: u64 = 3600;

/// Default per-namespace bound on hot-tier entries.
pub const DEFAULT_MAX_L1_ENTRIES: usize = 1000;

/// Time-of-day gate for background refreshes.
///
/// Expensive origins (inference, rate-limited market feeds) are often only
/// worth refreshing inside a business window; outside it, stale entries
/// keep serving and are re-evaluated on the next read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshWindow {
    /// Refresh whenever staleness is detected.
    Always,
    /// Refresh only between `start` (inclusive) and `end` (exclusive),
    /// hours in UTC. Wrap-around windows (`start > end`) are supported,
    /// e.g. `22..6` for overnight batch refreshes.
    UtcHours { start: u32, end: u32 },
}

impl RefreshWindow {
    /// Whether `now` falls inside the window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        match *self {
            Self::Always => true,
            Self::UtcHours { start, end } => {
                let hour = now.hour();
                if start == end {
                    // Degenerate window: treat as always-open rather than
                    // silently disabling refresh.
                    true
                } else if start < end {
                    hour >= start && hour < end
                } else {
                    hour >= start || hour < end
                }
            }
        }
    }
}

impl Default for RefreshWindow {
    fn default() -> Self {
        Self::Always
    }
}

/// Configuration for one cache namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespacePolicy {
    /// The namespace this policy applies to.
    pub namespace: String,

    /// Hot-tier TTL: how long an L1 entry serves without consulting L2.
    pub l1_ttl: Duration,

    /// Serve-stale window past `l1_ttl` while a background refresh is in
    /// flight, avoiding synchronous stalls at the TTL boundary.
    pub l1_grace_period: Duration,

    /// Age at which a stale-but-valid L2 read triggers a background refresh.
    pub l2_refresh_threshold: Duration,

    /// Master switch for background refreshes in this namespace.
    pub background_refresh_enabled: bool,

    /// Time-of-day gate for background refreshes.
    pub refresh_window: RefreshWindow,

    /// Bound on hot-tier entries for this namespace, enforced by LRU
    /// eviction.
    pub max_l1_entries: usize,
}

impl NamespacePolicy {
    /// Create a policy with default tuning for the given namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            l1_ttl: Duration::from_secs(DEFAULT_L1_TTL_SECS),
            l1_grace_period: Duration::from_secs(DEFAULT_L1_GRACE_PERIOD_SECS),
            l2_refresh_threshold: Duration::from_secs(DEFAULT_L2_REFRESH_THRESHOLD_SECS),
            background_refresh_enabled: true,
            refresh_window: RefreshWindow::Always,
            max_l1_entries: DEFAULT_MAX_L1_ENTRIES,
        }
    }

    /// Create a NamespacePolicy from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_L1_TTL_SECS`: Hot-tier TTL (default: 300)
    /// - `STRATA_L1_GRACE_PERIOD_SECS`: Serve-stale grace window (default: 30)
    /// - `STRATA_L2_REFRESH_THRESHOLD_SECS`: Staleness threshold (default: 3600)
    /// - `STRATA_BACKGROUND_REFRESH_ENABLED`: Master refresh switch (default: true)
    /// - `STRATA_MAX_L1_ENTRIES`: Per-namespace hot-tier bound (default: 1000)
    pub fn from_env(namespace: impl Into<String>) -> Self {
        let l1_ttl = Duration::from_secs(
            std::env::var("STRATA_L1_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_L1_TTL_SECS),
        );

        let l1_grace_period = Duration::from_secs(
            std::env::var("STRATA_L1_GRACE_PERIOD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_L1_GRACE_PERIOD_SECS),
        );

        let l2_refresh_threshold = Duration::from_secs(
            std::env::var("STRATA_L2_REFRESH_THRESHOLD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_L2_REFRESH_THRESHOLD_SECS),
        );

        let background_refresh_enabled = std::env::var("STRATA_BACKGROUND_REFRESH_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let max_l1_entries = std::env::var("STRATA_MAX_L1_ENTRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_L1_ENTRIES);

        Self {
            namespace: namespace.into(),
            l1_ttl,
            l1_grace_period,
            l2_refresh_threshold,
            background_refresh_enabled,
            refresh_window: RefreshWindow::Always,
            max_l1_entries,
        }
    }

    /// Set the hot-tier TTL.
    pub fn with_l1_ttl(mut self, ttl: Duration) -> Self {
        self.l1_ttl = ttl;
        self
    }

    /// Set the serve-stale grace window.
    pub fn with_l1_grace_period(mut self, grace: Duration) -> Self {
        self.l1_grace_period = grace;
        self
    }

    /// Set the staleness threshold for background refresh.
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.l2_refresh_threshold = threshold;
        self
    }

    /// Enable or disable background refreshes.
    pub fn with_background_refresh(mut self, enabled: bool) -> Self {
        self.background_refresh_enabled = enabled;
        self
    }

    /// Set the refresh window.
    pub fn with_refresh_window(mut self, window: RefreshWindow) -> Self {
        self.refresh_window = window;
        self
    }

    /// Set the per-namespace hot-tier bound.
    pub fn with_max_l1_entries(mut self, max: usize) -> Self {
        self.max_l1_entries = max;
        self
    }
}
