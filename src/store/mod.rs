//! Shared key-value store port.
//!
//! Every piece of coordination state (token buckets, idempotency locks and
//! results) lives in an external store shared by all API workers. This module
//! defines the narrow contract the limiter and the coordinator need; adapters
//! live in the submodules:
//!
//! - [`RedisStore`] - production backend (`SET ... PX ... NX`)
//! - [`MemoryStore`] - single-process backend and test double
//!
//! # Atomicity
//!
//! `set` with `only_if_absent` **must** be atomic in every implementation. It
//! is the only primitive the idempotency coordinator relies on for its
//! at-most-one guarantee. Plain `get`/`set`/`delete` carry no atomicity
//! requirement beyond a single call.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

/// Key probed by the default [`Store::ping`] implementation.
pub const PING_KEY: &str = "__mailer_guard_ping__";

/// Errors surfaced by store adapters.
///
/// These are never retried or swallowed inside the coordination layer; the
/// caller decides whether a store outage fails open or closed.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transport or backend failure (connection refused, timeout, server error).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("store record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Write options for [`Store::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Time after which the key expires on its own.
    pub ttl: Duration,
    /// Only create the key if it does not already exist.
    pub only_if_absent: bool,
}

impl SetOptions {
    /// Unconditional write with a TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            only_if_absent: false,
        }
    }

    /// Turn this write into a set-if-absent.
    pub fn only_if_absent(mut self) -> Self {
        self.only_if_absent = true;
        self
    }
}

/// Atomic key-value store with TTL support.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value.
    ///
    /// Returns `true` when the value was written. With `only_if_absent` set,
    /// returns `false` if the key already existed (the stored value is left
    /// untouched).
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError> {
        self.get(PING_KEY).await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_set_options_builders() {
        let opts = SetOptions::with_ttl(Duration::from_secs(5));
        assert_eq!(opts.ttl, Duration::from_secs(5));
        assert!(!opts.only_if_absent);
        assert!(opts.only_if_absent().only_if_absent);
    }

    #[test]
    fn test_serialization_error_converts() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let store_err: StoreError = err.into();
        assert!(matches!(store_err, StoreError::Serialization(_)));
    }
}
