//! STRATA Cache - Tiered Cache Engine
//!
//! A two-tier cache with non-destructive staleness management:
//!
//! - **Hot tier (L1)**: bounded in-process map with LRU eviction, short TTL,
//!   and a serve-stale grace window.
//! - **Entry store (L2)**: durable keyed storage that is never invalidated
//!   by age - entries are only refreshed in the background, and only
//!   explicit delete/clear operations remove them.
//!
//! # Design Philosophy
//!
//! Old is not invalid. The single most important correctness property of
//! this engine is that staleness is a policy decision made by the
//! [`TieredCache`] manager, never by the storage layer: an entry that was
//! ever successfully cached keeps serving (flagged `stale`) until a
//! background refresh - guarded by `strata-origin`'s resilience wrapper -
//! replaces it. A caller essentially never sees "no data" for a key that
//! was ever written; only first-ever requests during an origin outage
//! surface an error.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(LmdbEntryStore::new("/var/lib/strata", 512)?);
//! let cache = TieredCache::new(store);
//!
//! let origin = Arc::new(ResilientOrigin::with_defaults(sentiment_origin));
//! cache.configure_with_origin(
//!     NamespacePolicy::new("sentiment")
//!         .with_refresh_threshold(Duration::from_secs(900)),
//!     origin,
//! );
//!
//! // Serves from L1, falls back to L2, fetches through the origin on a
//! // total miss. Stale values are served immediately and refreshed in the
//! // background.
//! let read = cache.read::<SentimentReport>("sentiment", "AAPL").await?;
//! ```

pub mod constants;
pub mod hot;
pub mod lmdb;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod promotion;
pub mod read;
pub mod store;

pub use hot::{HotCache, L1Hit};
pub use lmdb::{LmdbEntryStore, NamespacedKey};
pub use manager::TieredCache;
pub use memory::MemoryEntryStore;
pub use metrics::MetricsRegistry;
pub use promotion::{
    promotion_task, AccessTracker, PromotionConfig, PromotionMetrics, PromotionSnapshot,
};
pub use read::{CacheSource, CachedValue, ReadMetadata};
pub use store::{EntryStore, StoreStats};
