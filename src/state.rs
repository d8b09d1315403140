//! Shared application state for Axum handlers.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers. It includes:
//!
//! - **Coordination**: Rate limiter and idempotent executor over one store
//! - **Services**: Email dispatch
//! - **Configuration**: Runtime configuration access
//! - **Store health**: Background-probed reachability for `/health` and `/ready`
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken` for proper lifecycle management. Call `shutdown()`
//! to gracefully stop all background tasks before application exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::config::{Config, StoreBackend};
use crate::error::AppResult;
use crate::idempotency::IdempotencyCoordinator;
use crate::limiter::TokenBucketLimiter;
use crate::metrics;
use crate::services::{DispatchService, IdempotentExecutor};
use crate::store::{MemoryStore, RedisStore, RedisStoreConfig, Store};

/// Connect the store backend selected by `config`.
///
/// # Errors
///
/// Returns `AppError::StoreUnavailable` if Redis cannot be reached.
pub async fn connect_store(config: &Config) -> AppResult<Arc<dyn Store>> {
    match config.store_backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect_with_config(
                &config.redis_url,
                RedisStoreConfig {
                    command_timeout: config.store_command_timeout,
                },
            )
            .await?;
            info!("Using Redis coordination store");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory coordination store; limits are not shared between processes");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Shared application state for Axum handlers.
///
/// # Lifecycle
///
/// Background tasks are spawned when the state is created. Call `shutdown()`
/// before dropping to ensure clean task termination:
///
/// ```rust,ignore
/// let state = AppState::new(store, config)?;
/// // ... use state ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Workspace limiter (`None` when rate limiting is disabled)
    pub limiter: Option<TokenBucketLimiter>,
    /// Idempotency caller protocol around email dispatch
    pub executor: IdempotentExecutor,
    pub dispatch: DispatchService,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
    store: Arc<dyn Store>,
    /// Result of the last background store probe
    store_up: Arc<AtomicBool>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state over a connected store.
    ///
    /// Must be called inside a Tokio runtime; it spawns the store health
    /// probe, which runs every `config.health_check_interval`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the limiter configuration is invalid.
    pub fn new(store: Arc<dyn Store>, config: Config) -> AppResult<Self> {
        let limiter = if config.rate_limiting_enabled() {
            Some(TokenBucketLimiter::new(
                store.clone(),
                config.rate_limiter_config(),
            )?)
        } else {
            None
        };

        let coordinator = IdempotencyCoordinator::new(store.clone(), config.idempotency_config());
        let executor = IdempotentExecutor::new(coordinator, config.idempotency_duplicate_wait);

        let state = Self {
            limiter,
            executor,
            dispatch: DispatchService::new(),
            started_at: Instant::now(),
            config: Arc::new(config),
            store,
            store_up: Arc::new(AtomicBool::new(true)),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_store_probe_task();

        Ok(state)
    }

    /// Whether the store answered the most recent probe.
    pub fn store_up(&self) -> bool {
        self.store_up.load(Ordering::SeqCst)
    }

    /// Probe the store now and record the result.
    pub async fn probe_store(&self) -> bool {
        probe(self.store.as_ref(), &self.store_up).await
    }

    /// Spawn the background store probe task.
    ///
    /// The first probe runs immediately so `/ready` reflects reality soon
    /// after startup.
    fn spawn_store_probe_task(&self) {
        let store = self.store.clone();
        let store_up = self.store_up.clone();
        let interval_duration = self.config.health_check_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(interval_duration);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Store probe task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        probe(store.as_ref(), &store_up).await;
                    }
                }
            }

            debug!("Store probe task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Ping the store, update the reachability flag and metrics.
async fn probe(store: &dyn Store, store_up: &AtomicBool) -> bool {
    let started = Instant::now();
    let result = store.ping().await;
    metrics::record_store_probe_duration(started.elapsed().as_secs_f64());

    let up = result.is_ok();
    let was_up = store_up.swap(up, Ordering::SeqCst);
    metrics::set_store_up(up);

    match result {
        Err(e) if was_up => warn!(error = %e, "Health check: coordination store is down"),
        Err(e) => trace!(error = %e, "Health check: coordination store still down"),
        Ok(()) if !was_up => info!("Health check: coordination store recovered"),
        Ok(()) => trace!("Health check: coordination store OK"),
    }

    up
}
