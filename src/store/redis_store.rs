//! Redis-backed store.
//!
//! Shares coordination state across every API worker through a single Redis
//! deployment.
//!
//! ## Commands
//!
//! | Operation | Redis command |
//! |-----------|---------------|
//! | `get` | `GET key` |
//! | `set` | `SET key value PX ttl_ms` |
//! | `set` (only if absent) | `SET key value PX ttl_ms NX` |
//! | `delete` | `DEL key` |
//! | `ping` | `PING` |
//!
//! `SET ... NX` is atomic on the server, which is what the idempotency
//! coordinator's lock relies on.
//!
//! ## Connections
//!
//! A `redis::aio::ConnectionManager` multiplexes all commands over one
//! connection and reconnects transparently. It is cheap to clone, so each
//! command works on its own clone instead of serializing through a lock.
//!
//! ## Timeouts
//!
//! Every command is bounded by `command_timeout`. A command that does not
//! finish in time is abandoned and reported as [`StoreError::Unavailable`];
//! the key's TTL bounds how long any write it may still complete will linger.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, warn};

use super::{SetOptions, Store, StoreError};

/// Configuration for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Upper bound for a single command round-trip (default: 2 seconds).
    pub command_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(2),
        }
    }
}

/// [`Store`] implementation on top of Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URL is invalid or the
    /// initial connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect with a custom configuration.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = tokio::time::timeout(
            config.command_timeout,
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| {
            StoreError::Unavailable(format!(
                "connecting to Redis timed out after {:?}",
                config.command_timeout
            ))
        })??;

        debug!("Connected to Redis");
        Ok(Self { connection, config })
    }

    /// Run a command under the configured timeout.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(result) => result.map_err(|e| {
                warn!(operation, error = %e, "Redis command failed");
                StoreError::from(e)
            }),
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.config.command_timeout.as_millis() as u64,
                    "Redis command timed out"
                );
                Err(StoreError::Unavailable(format!(
                    "Redis {operation} timed out after {:?}",
                    self.config.command_timeout
                )))
            }
        }
    }
}

/// `PX` rejects zero, so sub-millisecond TTLs round up to one millisecond.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        self.bounded("GET", async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ttl_millis(options.ttl));
        if options.only_if_absent {
            cmd.arg("NX");
        }

        // "OK" when written, nil when NX found an existing key.
        let reply: Option<String> = self
            .bounded("SET", async move { cmd.query_async(&mut conn).await })
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.bounded("DEL", async move { conn.del::<_, ()>(key).await })
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _pong: String = self
            .bounded("PING", async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }
}
