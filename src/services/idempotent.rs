use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::idempotency::{
    IdempotencyCheck, IdempotencyCoordinator, IdempotencyError, LockAcquisition, StoredResult,
};
use crate::metrics;

/// What happened to a request run through [`IdempotentExecutor::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotentOutcome {
    /// The operation ran and its result was stored.
    Executed(Value),
    /// A previous identical request already completed; its result is returned.
    Replayed(StoredResult),
    /// An identical request is still being processed elsewhere.
    InFlight,
}

/// Runs operations under the idempotency caller protocol.
///
/// ```text
/// check → acquire_lock → check → execute → store_result → release_lock
///              │
///              └─ duplicate → wait once → check → replay or in-flight
/// ```
///
/// There is exactly one bounded wait for an in-flight duplicate; the caller
/// decides what to tell the client when it is still running after that.
#[derive(Debug, Clone)]
pub struct IdempotentExecutor {
    coordinator: IdempotencyCoordinator,
    duplicate_wait: Duration,
}

impl IdempotentExecutor {
    pub fn new(coordinator: IdempotencyCoordinator, duplicate_wait: Duration) -> Self {
        Self {
            coordinator,
            duplicate_wait,
        }
    }

    pub fn coordinator(&self) -> &IdempotencyCoordinator {
        &self.coordinator
    }

    /// Execute `operation` at most once for `key`.
    ///
    /// If the operation fails the lock is released and nothing is stored, so
    /// a retry with the same key runs the operation again.
    ///
    /// # Errors
    ///
    /// Coordinator failures (conflict, store) converted into `E`, or the
    /// operation's own error.
    #[instrument(skip(self, body, operation))]
    pub async fn run<F, Fut, E>(
        &self,
        key: &str,
        body: &Value,
        operation: F,
    ) -> Result<IdempotentOutcome, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: From<IdempotencyError>,
    {
        if let IdempotencyCheck::Cached(stored) = self.coordinator.check(key, body).await? {
            return Ok(IdempotentOutcome::Replayed(stored));
        }

        let body_hash = match self.coordinator.acquire_lock(key, body).await? {
            LockAcquisition::Acquired { body_hash, .. } => body_hash,
            LockAcquisition::Duplicate => return self.await_in_flight(key, body).await,
        };

        // The original may have stored its result and released the lock
        // between our check and our acquisition.
        match self.coordinator.check(key, body).await {
            Ok(IdempotencyCheck::Fresh) => {}
            Ok(IdempotencyCheck::Cached(stored)) => {
                self.release_quietly(key).await;
                return Ok(IdempotentOutcome::Replayed(stored));
            }
            Err(e) => {
                self.release_quietly(key).await;
                return Err(e.into());
            }
        }

        let result = match operation().await {
            Ok(result) => result,
            Err(e) => {
                warn!(key, "Idempotent operation failed, releasing lock");
                self.release_quietly(key).await;
                return Err(e);
            }
        };

        if let Err(e) = self.coordinator.store_result(key, &result, &body_hash).await {
            self.release_quietly(key).await;
            return Err(e.into());
        }
        self.coordinator.release_lock(key).await?;

        metrics::record_idempotency_outcome("executed");
        info!(key, "Idempotent operation executed");
        Ok(IdempotentOutcome::Executed(result))
    }

    async fn await_in_flight<E>(&self, key: &str, body: &Value) -> Result<IdempotentOutcome, E>
    where
        E: From<IdempotencyError>,
    {
        let wait = jittered(self.duplicate_wait);
        debug!(key, wait_ms = wait.as_millis() as u64, "Waiting for in-flight duplicate");
        tokio::time::sleep(wait).await;

        match self.coordinator.check(key, body).await? {
            IdempotencyCheck::Cached(stored) => Ok(IdempotentOutcome::Replayed(stored)),
            IdempotencyCheck::Fresh => Ok(IdempotentOutcome::InFlight),
        }
    }

    async fn release_quietly(&self, key: &str) {
        if let Err(e) = self.coordinator.release_lock(key).await {
            // The lock TTL bounds how long the key stays blocked.
            warn!(key, error = %e, "Failed to release idempotency lock");
        }
    }
}

/// Add up to 20% random jitter so waiting duplicates don't re-check in lockstep.
fn jittered(wait: Duration) -> Duration {
    let max_jitter_ms = u64::try_from(wait.as_millis() / 5).unwrap_or(u64::MAX);
    if max_jitter_ms == 0 {
        return wait;
    }
    wait + Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
}
