//! # mailer_guard
//!
//! Distributed request coordination for a multi-worker email API:
//!
//! - **Rate limiting**: token buckets per workspace, shared through a store
//! - **Idempotency**: at-most-once execution per client key, with replay of
//!   the stored result and conflict detection on a changed body
//! - **Canonical hashing**: key-order independent SHA-256 of JSON bodies
//! - **HTTP surface**: Axum service exercising both over `POST /v1/emails`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → CORS → Rate Limit / Auth) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, emails, admin)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  IdempotentExecutor, DispatchService                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TokenBucketLimiter, IdempotencyCoordinator                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Store (RedisStore | MemoryStore)          Clock            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Library Use
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mailer_guard::{MemoryStore, RateLimiterConfig, Store, TokenBucketLimiter};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
//! let limiter = TokenBucketLimiter::new(store, RateLimiterConfig::new(100, 10.0))?;
//!
//! let decision = limiter.limit("ws_123", 1).await?;
//! if !decision.allowed {
//!     println!("retry in {:?}s", decision.retry_after);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Running the Service
//!
//! ```bash
//! REDIS_URL=redis://127.0.0.1:6379/ ADMIN_API_KEY=your-secret-key cargo run
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hashing;
pub mod idempotency;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use clock::{Clock, MockClock, SystemClock};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use hashing::{hash_object, hash_string};
pub use idempotency::{
    IdempotencyCheck, IdempotencyConfig, IdempotencyCoordinator, IdempotencyError,
    LockAcquisition, StoredResult,
};
pub use limiter::{
    RateLimitDecision, RateLimitError, RateLimitInfo, RateLimiterConfig, TokenBucketLimiter,
};
pub use routes::build_router;
pub use services::{IdempotentExecutor, IdempotentOutcome};
pub use state::{AppState, connect_store};
pub use store::{MemoryStore, RedisStore, SetOptions, Store, StoreError};
