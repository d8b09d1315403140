//! Idempotency coordination.
//!
//! Guarantees at most one successful execution per idempotency key and lets
//! retries observe the original outcome instead of repeating side effects.
//!
//! # Records
//!
//! | Record | Key | Lifetime |
//! |--------|-----|----------|
//! | Lock   | `{prefix}lock:{key}`   | acquire → release, or lock TTL |
//! | Result | `{prefix}result:{key}` | store → result TTL |
//!
//! Both records carry the canonical fingerprint of the request body
//! ([`hash_object`]). Reusing a key with a different body is a
//! [`IdempotencyError::Conflict`] and is never merged or overwritten.
//!
//! # Caller Protocol
//!
//! ```text
//! check ──cached──────────────────────────────► return cached result
//!   │ fresh
//!   ▼
//! acquire_lock ──duplicate──► short wait, check again ──► cached / in flight
//!   │ acquired
//!   ▼
//! execute → store_result → release_lock
//! ```
//!
//! [`crate::services::IdempotentExecutor`] implements this protocol.
//!
//! # Atomicity
//!
//! Only lock creation needs to be atomic; it is a single set-if-absent store
//! call. Everything else is a plain read or an independent write.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::hashing::hash_object;
use crate::metrics;
use crate::store::{SetOptions, Store, StoreError};

/// Errors from the idempotency coordinator.
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// The key was already used with a different request body.
    #[error("idempotency key '{key}' was already used with a different request body")]
    Conflict { key: String },

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IdempotencyError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, IdempotencyError::Conflict { .. })
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Store key namespace.
    pub prefix: String,
    /// How long an unreleased lock blocks the key (bounds the damage of a
    /// worker crashing mid-request).
    pub lock_ttl: Duration,
    /// How long a completed result stays replayable.
    pub result_ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            prefix: "idempotency:".to_string(),
            lock_ttl: Duration::from_secs(300),
            result_ttl: Duration::from_secs(86_400),
        }
    }
}

impl IdempotencyConfig {
    /// Use one TTL for both locks and results.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self.result_ttl = ttl;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Marker stored while a request is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub body_hash: String,
}

/// Outcome of a completed request, replayable for the result TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub result: Value,
    pub body_hash: String,
    /// Epoch milliseconds at which the result was stored.
    pub timestamp: i64,
}

/// Outcome of [`IdempotencyCoordinator::acquire_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    /// This caller owns the key and should process the request.
    Acquired { lock_key: String, body_hash: String },
    /// An identical request is already in flight.
    Duplicate,
}

impl LockAcquisition {
    pub fn acquired(&self) -> bool {
        matches!(self, LockAcquisition::Acquired { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, LockAcquisition::Duplicate)
    }
}

/// Outcome of [`IdempotencyCoordinator::check`].
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyCheck {
    /// No completed result; proceed to acquire the lock.
    Fresh,
    /// A result produced by an identical body exists and may be returned as is.
    Cached(StoredResult),
}

impl IdempotencyCheck {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IdempotencyCheck::Cached(_))
    }
}

/// Per-key mutual exclusion and result caching over a shared [`Store`].
#[derive(Clone)]
pub struct IdempotencyCoordinator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: IdempotencyConfig,
}

impl std::fmt::Debug for IdempotencyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn Store>, config: IdempotencyConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock::new()), config)
    }

    pub fn with_clock(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: IdempotencyConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    pub fn lock_key(&self, key: &str) -> String {
        format!("{}lock:{}", self.config.prefix, key)
    }

    pub fn result_key(&self, key: &str) -> String {
        format!("{}result:{}", self.config.prefix, key)
    }

    /// Try to become the single executor for `key`.
    ///
    /// # Errors
    ///
    /// - [`IdempotencyError::Conflict`] if a lock for `key` exists with a
    ///   different body fingerprint
    /// - [`IdempotencyError::Store`] on store failure
    #[instrument(skip(self, body))]
    pub async fn acquire_lock(&self, key: &str, body: &Value) -> Result<LockAcquisition, IdempotencyError> {
        let body_hash = hash_object(body);
        let lock_key = self.lock_key(key);
        let record = serde_json::to_string(&LockRecord {
            body_hash: body_hash.clone(),
        })
        .map_err(StoreError::from)?;
        let options = SetOptions::with_ttl(self.config.lock_ttl).only_if_absent();

        // A lock that expires between the failed create and the read is
        // re-attempted once; losing twice means someone else holds it now.
        for attempt in 0..2 {
            if self.store.set(&lock_key, &record, options).await? {
                debug!(key, "Idempotency lock acquired");
                return Ok(LockAcquisition::Acquired { lock_key, body_hash });
            }

            let Some(raw) = self.store.get(&lock_key).await? else {
                debug!(key, attempt, "Idempotency lock vanished before it could be read");
                continue;
            };
            let existing: LockRecord = serde_json::from_str(&raw).map_err(StoreError::from)?;

            if existing.body_hash != body_hash {
                warn!(key, "Idempotency key reused with a different body while in flight");
                metrics::record_idempotency_outcome("conflict");
                return Err(IdempotencyError::Conflict {
                    key: key.to_string(),
                });
            }

            info!(key, "Duplicate request while original is in flight");
            metrics::record_idempotency_outcome("in_flight");
            return Ok(LockAcquisition::Duplicate);
        }

        metrics::record_idempotency_outcome("in_flight");
        Ok(LockAcquisition::Duplicate)
    }

    /// Drop the lock for `key`, allowing a fresh acquisition.
    #[instrument(skip(self))]
    pub async fn release_lock(&self, key: &str) -> Result<(), IdempotencyError> {
        self.store.delete(&self.lock_key(key)).await?;
        debug!(key, "Idempotency lock released");
        Ok(())
    }

    /// Persist the outcome of a completed request.
    ///
    /// Independent of the lock: the result stays retrievable after the lock
    /// is released or expires.
    #[instrument(skip(self, result))]
    pub async fn store_result(&self, key: &str, result: &Value, body_hash: &str) -> Result<(), IdempotencyError> {
        let record = StoredResult {
            result: result.clone(),
            body_hash: body_hash.to_string(),
            timestamp: self.clock.now_millis(),
        };
        let encoded = serde_json::to_string(&record).map_err(StoreError::from)?;
        self.store
            .set(
                &self.result_key(key),
                &encoded,
                SetOptions::with_ttl(self.config.result_ttl),
            )
            .await?;
        debug!(key, "Idempotent result stored");
        Ok(())
    }

    /// Fetch the stored result for `key`, if any.
    #[instrument(skip(self))]
    pub async fn get_result(&self, key: &str) -> Result<Option<StoredResult>, IdempotencyError> {
        match self.store.get(&self.result_key(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(StoreError::from)?)),
            None => Ok(None),
        }
    }

    /// Read-only pre-check: is there a reusable result for this request?
    ///
    /// # Errors
    ///
    /// [`IdempotencyError::Conflict`] if a result exists for `key` that was
    /// produced by a different body.
    #[instrument(skip(self, body))]
    pub async fn check(&self, key: &str, body: &Value) -> Result<IdempotencyCheck, IdempotencyError> {
        let Some(stored) = self.get_result(key).await? else {
            return Ok(IdempotencyCheck::Fresh);
        };

        if stored.body_hash != hash_object(body) {
            warn!(key, "Idempotency key reused with a different body");
            metrics::record_idempotency_outcome("conflict");
            return Err(IdempotencyError::Conflict {
                key: key.to_string(),
            });
        }

        debug!(key, stored_at = stored.timestamp, "Replaying stored result");
        metrics::record_idempotency_outcome("replayed");
        Ok(IdempotencyCheck::Cached(stored))
    }

    /// Remove both the lock and the result for `key`.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, key: &str) -> Result<(), IdempotencyError> {
        self.store.delete(&self.lock_key(key)).await?;
        self.store.delete(&self.result_key(key)).await?;
        info!(key, "Idempotency records removed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn coordinator() -> (IdempotencyCoordinator, MemoryStore, MockClock) {
        let clock = MockClock::new(1_700_000_000.0);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let coordinator = IdempotencyCoordinator::with_clock(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            IdempotencyConfig::default(),
        );
        (coordinator, store, clock)
    }

    #[tokio::test]
    async fn test_acquire_then_duplicate() {
        let (coordinator, _store, _clock) = coordinator();
        let body = json!({"amount": 100});

        let first = coordinator.acquire_lock("req-42", &body).await.unwrap();
        assert!(first.acquired());
        match first {
            LockAcquisition::Acquired { lock_key, body_hash } => {
                assert_eq!(lock_key, "idempotency:lock:req-42");
                assert_eq!(body_hash, hash_object(&body));
            }
            LockAcquisition::Duplicate => panic!("expected acquisition"),
        }

        let second = coordinator.acquire_lock("req-42", &body).await.unwrap();
        assert!(second.is_duplicate());
        assert!(!second.acquired());
    }

    #[tokio::test]
    async fn test_duplicate_ignores_key_order() {
        let (coordinator, _store, _clock) = coordinator();

        coordinator
            .acquire_lock("k", &json!({"to": "a@example.com", "subject": "hi"}))
            .await
            .unwrap();
        let second = coordinator
            .acquire_lock("k", &json!({"subject": "hi", "to": "a@example.com"}))
            .await
            .unwrap();
        assert!(second.is_duplicate());
    }

    #[tokio::test]
    async fn test_acquire_with_different_body_conflicts() {
        let (coordinator, _store, _clock) = coordinator();

        coordinator
            .acquire_lock("req-42", &json!({"amount": 100}))
            .await
            .unwrap();
        let err = coordinator
            .acquire_lock("req-42", &json!({"amount": 200}))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(err.to_string().contains("req-42"));
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let (coordinator, _store, _clock) = coordinator();

        coordinator.acquire_lock("k", &json!({"a": 1})).await.unwrap();
        coordinator.release_lock("k").await.unwrap();

        // Any body may take the key after release.
        let again = coordinator.acquire_lock("k", &json!({"b": 2})).await.unwrap();
        assert!(again.acquired());
    }

    #[tokio::test]
    async fn test_lock_expires_with_ttl() {
        let (coordinator, _store, clock) = coordinator();

        coordinator.acquire_lock("k", &json!({"a": 1})).await.unwrap();
        clock.advance(Duration::from_secs(301));

        let again = coordinator.acquire_lock("k", &json!({"a": 1})).await.unwrap();
        assert!(again.acquired());
    }

    #[tokio::test]
    async fn test_store_and_get_result_round_trip() {
        let (coordinator, _store, _clock) = coordinator();
        let result = json!({"id": "email_123", "status": "queued"});

        coordinator.store_result("k", &result, "abc123").await.unwrap();
        let stored = coordinator.get_result("k").await.unwrap().unwrap();

        assert_eq!(stored.result, result);
        assert_eq!(stored.body_hash, "abc123");
        assert_eq!(stored.timestamp, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_get_result_absent() {
        let (coordinator, _store, _clock) = coordinator();
        assert!(coordinator.get_result("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_check_fresh_cached_and_conflict() {
        let (coordinator, _store, _clock) = coordinator();
        let body = json!({"to": ["a@example.com"], "subject": "Welcome"});

        assert_eq!(
            coordinator.check("k", &body).await.unwrap(),
            IdempotencyCheck::Fresh
        );

        coordinator
            .store_result("k", &json!({"id": "e1"}), &hash_object(&body))
            .await
            .unwrap();

        let cached = coordinator.check("k", &body).await.unwrap();
        assert!(cached.is_duplicate());
        match cached {
            IdempotencyCheck::Cached(stored) => assert_eq!(stored.result, json!({"id": "e1"})),
            IdempotencyCheck::Fresh => panic!("expected cached result"),
        }

        let err = coordinator
            .check("k", &json!({"to": ["b@example.com"], "subject": "Welcome"}))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_result_outlives_lock() {
        let (coordinator, _store, clock) = coordinator();
        let body = json!({"a": 1});

        coordinator.acquire_lock("k", &body).await.unwrap();
        coordinator
            .store_result("k", &json!("done"), &hash_object(&body))
            .await
            .unwrap();
        coordinator.release_lock("k").await.unwrap();

        clock.advance(Duration::from_secs(3600));
        assert!(coordinator.check("k", &body).await.unwrap().is_duplicate());
    }

    #[tokio::test]
    async fn test_cleanup_removes_everything() {
        let (coordinator, store, _clock) = coordinator();
        let body = json!({"a": 1});

        coordinator.acquire_lock("k", &body).await.unwrap();
        coordinator
            .store_result("k", &json!("done"), &hash_object(&body))
            .await
            .unwrap();

        coordinator.cleanup("k").await.unwrap();
        assert!(store.is_empty().await);

        let fresh = coordinator.acquire_lock("k", &json!({"other": true})).await.unwrap();
        assert!(fresh.acquired());
        assert_eq!(
            coordinator.check("k", &json!({"other": true})).await.unwrap(),
            IdempotencyCheck::Fresh
        );
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_single_owner() {
        let (coordinator, _store, _clock) = coordinator();
        let body = json!({"amount": 100});

        let mut handles = Vec::new();
        for _ in 0..16 {
            let coordinator = coordinator.clone();
            let body = body.clone();
            handles.push(tokio::spawn(async move {
                coordinator.acquire_lock("race", &body).await.unwrap()
            }));
        }

        let mut acquired = 0;
        for handle in handles {
            if handle.await.unwrap().acquired() {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);
    }

    #[tokio::test]
    async fn test_prefix_namespaces_keys() {
        let (_, store, clock) = coordinator();
        let coordinator = IdempotencyCoordinator::with_clock(
            Arc::new(store.clone()),
            Arc::new(clock),
            IdempotencyConfig::default().with_prefix("emails:"),
        );

        coordinator.acquire_lock("k", &json!({})).await.unwrap();
        assert!(store.get("emails:lock:k").await.unwrap().is_some());
    }

    #[test]
    fn test_with_ttl_sets_both() {
        let config = IdempotencyConfig::default().with_ttl(Duration::from_secs(42));
        assert_eq!(config.lock_ttl, Duration::from_secs(42));
        assert_eq!(config.result_ttl, Duration::from_secs(42));
    }
}
