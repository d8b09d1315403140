//! In-process store.
//!
//! Backs single-node deployments (`STORE_BACKEND=memory`) and serves as the
//! test double for everything built on the [`Store`] port. Expiry is lazy: an
//! entry past its deadline is treated as absent and dropped on the next access
//! to that key. Keys that are never touched again are dropped by a sweep that
//! runs inside `set` every [`SWEEP_INTERVAL`] writes, so no background task is
//! needed and the map stays bounded by the live key count.
//!
//! One `tokio::sync::Mutex` guards the whole map, which makes set-if-absent a
//! single critical section and therefore atomic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use super::{SetOptions, Store, StoreError};
use crate::clock::{Clock, SystemClock};

/// Number of writes between full sweeps of expired entries.
pub const SWEEP_INTERVAL: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// Epoch seconds after which the entry no longer exists.
    expires_at: f64,
}

impl Entry {
    fn is_live(&self, now: f64) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    writes_since_sweep: usize,
}

impl Entries {
    fn sweep(&mut self, now: f64) {
        let before = self.map.len();
        self.map.retain(|_, entry| entry.is_live(now));
        self.writes_since_sweep = 0;

        let evicted = before - self.map.len();
        if evicted > 0 {
            trace!(evicted, remaining = self.map.len(), "Swept expired entries");
        }
    }
}

/// Map-backed [`Store`] with TTL support.
///
/// Clones share the same underlying map.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<Entries>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store that expires entries on system time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty store that expires entries on the given clock.
    ///
    /// Tests pass the same `MockClock` to the store and to the limiter so that
    /// advancing time also ages TTLs.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries::default())),
            clock,
        }
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now_secs();
        let entries = self.entries.lock().await;
        entries.map.values().filter(|e| e.is_live(now)).count()
    }

    /// Number of entries held, expired or not.
    #[cfg(test)]
    async fn raw_len(&self) -> usize {
        self.entries.lock().await.map.len()
    }

    /// Whether the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.lock().await;

        match entries.map.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                trace!(key, "Dropping expired entry");
                entries.map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError> {
        let now = self.clock.now_secs();
        let mut entries = self.entries.lock().await;

        if options.only_if_absent
            && entries
                .map
                .get(key)
                .is_some_and(|existing| existing.is_live(now))
        {
            return Ok(false);
        }

        entries.writes_since_sweep += 1;
        if entries.writes_since_sweep >= SWEEP_INTERVAL {
            entries.sweep(now);
        }

        entries.map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + options.ttl.as_secs_f64(),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.map.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
