//! Origin contracts.
//!
//! An origin is the external, slow/unreliable source of truth for a cache
//! key's value: an inference call, a market-data fetch, an indicator series.
//! The pure trait lives here; runtime orchestration (timeout, retry, circuit
//! breaking) is in `strata-origin`.

use crate::error::OriginError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;

/// A pluggable source of truth for cache values.
///
/// The cache has no knowledge of what the payload represents; origins
/// return an opaque serialized value for a key, or a classified error.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Stable identifier for this origin, used for circuit-breaker keying
    /// and logging.
    fn origin_id(&self) -> &str;

    /// Produce a fresh value for `key`.
    async fn fetch(&self, key: &str) -> Result<Value, OriginError>;
}

/// Adapter turning a plain async closure into an [`Origin`].
///
/// # Example
///
/// ```ignore
/// let origin = FnOrigin::new("sentiment", |symbol| async move {
///     run_sentiment_inference(&symbol).await
/// });
/// ```
pub struct FnOrigin<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, OriginError>> + Send,
{
    id: String,
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnOrigin<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, OriginError>> + Send,
{
    pub fn new(id: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Origin for FnOrigin<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, OriginError>> + Send,
{
    fn origin_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, key: &str) -> Result<Value, OriginError> {
        (self.func)(key.to_string()).await
    }
}

// ============================================================================
// CIRCUIT STATE
// ============================================================================

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, testing if the origin recovered
    HalfOpen,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_circuit_state_from_u8() {
        assert_eq!(CircuitState::from(0), CircuitState::Closed);
        assert_eq!(CircuitState::from(1), CircuitState::Open);
        assert_eq!(CircuitState::from(2), CircuitState::HalfOpen);
        assert_eq!(CircuitState::from(255), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_fn_origin_delegates_to_closure() {
        let origin = FnOrigin::new("echo", |key: String| async move {
            Ok(json!({ "key": key }))
        });

        assert_eq!(origin.origin_id(), "echo");
        let value = origin.fetch("AAPL").await.expect("fetch should succeed");
        assert_eq!(value, json!({ "key": "AAPL" }));
    }

    #[tokio::test]
    async fn test_fn_origin_propagates_errors() {
        let origin = FnOrigin::new("failing", |_key: String| async move {
            Err(OriginError::Failed {
                origin: "failing".to_string(),
                reason: "provider outage".to_string(),
            })
        });

        let err = origin.fetch("AAPL").await.expect_err("fetch should fail");
        assert!(matches!(err, OriginError::Failed { .. }));
    }
}
