//! Distributed token-bucket rate limiter.
//!
//! # Algorithm
//!
//! Each identifier (typically a workspace id) owns a bucket holding up to
//! `max_tokens` tokens that refill continuously at `refill_rate` tokens per
//! second. A request of cost `c` is admitted when at least `c` tokens are
//! available, and consumes them.
//!
//! ```text
//! elapsed   = now - last_refill_time
//! available = min(max_tokens, tokens + elapsed * refill_rate)
//!
//! available >= cost  ->  persist {available - cost, now}, allow
//! available <  cost  ->  no write, deny, retry_after = ceil((cost - available) / rate)
//! ```
//!
//! Buckets are stored as JSON under `{prefix}{identifier}` with a TTL that is
//! refreshed on every admitted request, so idle buckets disappear on their own.
//! A missing bucket is a full bucket.
//!
//! # Precision
//!
//! Refill arithmetic and the persisted token count stay in `f64`. Only the
//! values reported to callers are truncated with `floor`, so fractional refill
//! is never lost between calls.
//!
//! # Consistency
//!
//! `limit` is a read followed by a write, not a single atomic operation.
//! Concurrent requests for the same identifier can read the same bucket and
//! both be admitted, briefly exceeding the configured rate. This is accepted
//! for best-effort throttling; a hard guarantee needs a server-side script.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::clock::{Clock, SystemClock};
use crate::metrics;
use crate::store::{SetOptions, Store, StoreError};

/// Errors from the rate limiter.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// Limiter configuration is unusable.
    #[error("invalid rate limiter configuration: {0}")]
    InvalidConfig(String),

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket capacity.
    pub max_tokens: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Idle horizon after which an untouched bucket is evicted by the store.
    pub ttl: Duration,
    /// Store key namespace.
    pub prefix: String,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            refill_rate: 10.0,
            ttl: Duration::from_secs(3600),
            prefix: "ratelimit:".to_string(),
        }
    }
}

impl RateLimiterConfig {
    pub fn new(max_tokens: u32, refill_rate: f64) -> Self {
        Self {
            max_tokens,
            refill_rate,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn validate(&self) -> Result<(), RateLimitError> {
        if self.max_tokens == 0 {
            return Err(RateLimitError::InvalidConfig(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(RateLimitError::InvalidConfig(format!(
                "refill_rate must be a positive number, got {}",
                self.refill_rate
            )));
        }
        if self.ttl.is_zero() {
            return Err(RateLimitError::InvalidConfig(
                "ttl must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Persisted bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub tokens: f64,
    /// Epoch seconds of the last refill.
    pub last_refill_time: f64,
}

/// Outcome of [`TokenBucketLimiter::limit`].
///
/// A denial is a normal value, not an error: the caller decides whether and
/// when to retry, typically by surfacing `retry_after` to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Whole tokens left after this request, in `[0, max_tokens]`.
    pub tokens_remaining: u32,
    pub max_tokens: u32,
    /// Seconds until `cost` tokens will be available (denials only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Epoch seconds at which the request could be retried (denials only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<i64>,
}

/// Read-only view returned by [`TokenBucketLimiter::get_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub tokens_remaining: u32,
    pub max_tokens: u32,
    /// Epoch seconds at which the bucket will be full again.
    pub reset_at: i64,
}

/// Token-bucket limiter over a shared [`Store`].
#[derive(Clone)]
pub struct TokenBucketLimiter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: RateLimiterConfig,
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenBucketLimiter {
    /// Create a limiter on system time.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidConfig`] for a zero capacity, a
    /// non-positive refill rate or a zero TTL.
    pub fn new(store: Arc<dyn Store>, config: RateLimiterConfig) -> Result<Self, RateLimitError> {
        Self::with_clock(store, Arc::new(SystemClock::new()), config)
    }

    /// Create a limiter on an explicit clock.
    pub fn with_clock(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: RateLimiterConfig,
    ) -> Result<Self, RateLimitError> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn max_tokens(&self) -> u32 {
        self.config.max_tokens
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}{}", self.config.prefix, identifier)
    }

    async fn load(&self, key: &str, now: f64) -> Result<Bucket, RateLimitError> {
        match self.store.get(key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).map_err(StoreError::from)?),
            None => Ok(Bucket {
                tokens: f64::from(self.config.max_tokens),
                last_refill_time: now,
            }),
        }
    }

    /// Tokens available at `now`, capped at capacity.
    fn available(&self, bucket: &Bucket, now: f64) -> f64 {
        // A bucket stamped by a worker whose clock runs ahead must not drain.
        let elapsed = (now - bucket.last_refill_time).max(0.0);
        let max = f64::from(self.config.max_tokens);
        (bucket.tokens + elapsed * self.config.refill_rate).min(max)
    }

    /// Try to consume `cost` tokens for `identifier`.
    ///
    /// A `cost` of zero is always allowed and only reports the current level.
    ///
    /// # Errors
    ///
    /// Store failures are propagated unchanged; this method never fails open
    /// or closed on its own.
    #[instrument(skip(self), fields(prefix = %self.config.prefix))]
    pub async fn limit(&self, identifier: &str, cost: u32) -> Result<RateLimitDecision, RateLimitError> {
        let key = self.key(identifier);
        let now = self.clock.now_secs();
        let bucket = self.load(&key, now).await?;
        let available = self.available(&bucket, now);
        let cost_f = f64::from(cost);

        if available >= cost_f {
            let remaining = available - cost_f;
            let updated = Bucket {
                tokens: remaining,
                last_refill_time: now,
            };
            let encoded = serde_json::to_string(&updated).map_err(StoreError::from)?;
            self.store
                .set(&key, &encoded, SetOptions::with_ttl(self.config.ttl))
                .await?;

            let tokens_remaining = truncate_tokens(remaining, self.config.max_tokens);
            debug!(identifier, cost, tokens_remaining, "Rate limit check passed");
            metrics::record_rate_limit_decision(true);

            return Ok(RateLimitDecision {
                allowed: true,
                tokens_remaining,
                max_tokens: self.config.max_tokens,
                retry_after: None,
                reset_at: None,
            });
        }

        let retry_after = ((cost_f - available) / self.config.refill_rate).ceil().max(0.0) as u64;
        let reset_at = (now + retry_after as f64).ceil() as i64;
        let tokens_remaining = truncate_tokens(available, self.config.max_tokens);

        info!(
            identifier,
            cost, tokens_remaining, retry_after, "Rate limit exceeded"
        );
        metrics::record_rate_limit_decision(false);

        Ok(RateLimitDecision {
            allowed: false,
            tokens_remaining,
            max_tokens: self.config.max_tokens,
            retry_after: Some(retry_after),
            reset_at: Some(reset_at),
        })
    }

    /// Report the current level for `identifier` without consuming tokens.
    ///
    /// Never writes to the store.
    #[instrument(skip(self))]
    pub async fn get_info(&self, identifier: &str) -> Result<RateLimitInfo, RateLimitError> {
        let key = self.key(identifier);
        let now = self.clock.now_secs();
        let bucket = self.load(&key, now).await?;
        let available = self.available(&bucket, now);

        let missing = f64::from(self.config.max_tokens) - available;
        let reset_at = (now + missing / self.config.refill_rate).ceil() as i64;

        Ok(RateLimitInfo {
            tokens_remaining: truncate_tokens(available, self.config.max_tokens),
            max_tokens: self.config.max_tokens,
            reset_at,
        })
    }

    /// Forget the bucket for `identifier`; the next call sees full capacity.
    #[instrument(skip(self))]
    pub async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        self.store.delete(&self.key(identifier)).await?;
        info!(identifier, "Rate limit bucket reset");
        Ok(())
    }
}

/// Truncate a token level for reporting, clamped to `[0, max]`.
fn truncate_tokens(tokens: f64, max: u32) -> u32 {
    tokens.floor().clamp(0.0, f64::from(max)) as u32
}
