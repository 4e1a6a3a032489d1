//! STRATA Core - Data Types and Contracts
//!
//! Pure data structures and trait contracts for the STRATA tiered cache.
//! All other crates depend on this. This crate contains ONLY types and
//! contracts - runtime behavior (tier orchestration, resilience) lives in
//! `strata-cache` and `strata-origin`.

use chrono::{DateTime, Utc};

pub mod entry;
pub mod error;
pub mod health;
pub mod origin;
pub mod policy;

pub use entry::{CacheEntry, EntryKey};
pub use error::{CacheError, OriginError, StoreError, StrataResult};
pub use health::{AgeHistogram, HealthSnapshot, HealthStatus, NamespaceHealth};
pub use origin::{CircuitState, FnOrigin, Origin};
pub use policy::{NamespacePolicy, RefreshWindow};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Logical cache partition name. Namespaces carry their own policy
/// (TTLs, refresh thresholds, bounds) and are created by configuration,
/// never implicitly.
pub type Namespace = String;
