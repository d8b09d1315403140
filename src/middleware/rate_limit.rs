//! Per-workspace rate limiting middleware.
//!
//! # Algorithm
//!
//! Delegates to [`TokenBucketLimiter`], whose buckets live in the shared
//! coordination store. Every API worker therefore draws from the same bucket
//! for a given workspace.
//!
//! # Identification
//!
//! Requests are keyed by the `X-Workspace-Id` header. A request without a
//! valid workspace id is rejected with 400 before it reaches the limiter.
//!
//! # Response Headers
//!
//! On every limited response:
//! - `X-RateLimit-Limit`: Bucket capacity
//! - `X-RateLimit-Remaining`: Whole tokens left after this request
//!
//! On rate limit exceeded (429), additionally:
//! - `Retry-After`: Seconds until enough tokens have refilled
//! - `X-RateLimit-Reset`: Epoch seconds at which the request would be admitted
//!
//! # Store Failures
//!
//! By default a store failure rejects the request with 503 (fail closed).
//! With `fail_open` the request is admitted without rate-limit headers and a
//! warning is logged.

use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;
use tower::{Layer, Service};
use tracing::warn;

use crate::error::AppError;
use crate::handlers::util::workspace_id;
use crate::limiter::{RateLimitDecision, TokenBucketLimiter};

pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = TokenBucketLimiter::new(store, RateLimiterConfig::new(100, 10.0))?;
/// let app = Router::new()
///     .route("/v1/emails", post(handler))
///     .layer(RateLimitLayer::new(limiter, false));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: TokenBucketLimiter,
    fail_open: bool,
}

impl RateLimitLayer {
    pub fn new(limiter: TokenBucketLimiter, fail_open: bool) -> Self {
        Self { limiter, fail_open }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            fail_open: self.fail_open,
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: TokenBucketLimiter,
    fail_open: bool,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let fail_open = self.fail_open;
        let mut inner = self.inner.clone();

        let workspace = workspace_id(req.headers());

        Box::pin(async move {
            let workspace = match workspace {
                Ok(workspace) => workspace,
                Err(e) => return Ok(e.into_response()),
            };

            let decision = match limiter.limit(&workspace, 1).await {
                Ok(decision) => decision,
                Err(e) if fail_open => {
                    warn!(
                        workspace = %workspace,
                        error = %e,
                        "Rate limit store unavailable, admitting request"
                    );
                    return inner.call(req).await;
                }
                Err(e) => return Ok(AppError::from(e).into_response()),
            };

            if !decision.allowed {
                warn!(
                    workspace = %workspace,
                    path = %req.uri().path(),
                    retry_after_secs = decision.retry_after,
                    "Rate limit exceeded for workspace"
                );
                return Ok(too_many_requests(&decision));
            }

            let mut response = inner.call(req).await?;
            apply_limit_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

fn apply_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.max_tokens));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.tokens_remaining));
}

fn too_many_requests(decision: &RateLimitDecision) -> Response<Body> {
    let retry_after = decision.retry_after.unwrap_or(1);

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "rate_limit_exceeded",
            "message": "Rate limit exceeded. Please retry later.",
            "retry_after": retry_after,
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    apply_limit_headers(headers, decision);
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    if let Some(reset_at) = decision.reset_at {
        headers.insert(RESET_HEADER, HeaderValue::from(reset_at));
    }
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::handlers::util::WORKSPACE_HEADER;
    use crate::limiter::RateLimiterConfig;
    use crate::store::{MemoryStore, SetOptions, Store, StoreError};
    use async_trait::async_trait;
    use axum::Router;
    use axum::routing::get;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn set(&self, _: &str, _: &str, _: SetOptions) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn app(store: Arc<dyn Store>, max_tokens: u32, fail_open: bool) -> Router {
        let clock = Arc::new(MockClock::new(1_700_000_000.0));
        let limiter = TokenBucketLimiter::with_clock(
            store,
            clock,
            RateLimiterConfig::new(max_tokens, 1.0),
        )
        .unwrap();

        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(RateLimitLayer::new(limiter, fail_open))
    }

    fn request(workspace: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(workspace) = workspace {
            builder = builder.header(WORKSPACE_HEADER, workspace);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_carries_headers() {
        let app = app(Arc::new(MemoryStore::new()), 2, false);

        let response = app.oneshot(request(Some("ws_1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[LIMIT_HEADER], "2");
        assert_eq!(response.headers()[REMAINING_HEADER], "1");
    }

    #[tokio::test]
    async fn test_exhausted_bucket_returns_429() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let app = app(store, 1, false);

        let first = app.clone().oneshot(request(Some("ws_1"))).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request(Some("ws_1"))).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[axum::http::header::RETRY_AFTER], "1");
        assert_eq!(second.headers()[REMAINING_HEADER], "0");
        assert_eq!(second.headers()[RESET_HEADER], "1700000001");
    }

    #[tokio::test]
    async fn test_workspaces_have_separate_buckets() {
        let app = app(Arc::new(MemoryStore::new()), 1, false);

        let a = app.clone().oneshot(request(Some("ws_a"))).await.unwrap();
        let b = app.oneshot(request(Some("ws_b"))).await.unwrap();
        assert_eq!(a.status(), StatusCode::OK);
        assert_eq!(b.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_workspace_is_bad_request() {
        let app = app(Arc::new(MemoryStore::new()), 5, false);

        let response = app.oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_workspace_is_bad_request() {
        let app = app(Arc::new(MemoryStore::new()), 5, false);

        let response = app.oneshot(request(Some("ws 1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let app = app(Arc::new(FailingStore), 5, false);

        let response = app.oneshot(request(Some("ws_1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_store_failure_can_fail_open() {
        let app = app(Arc::new(FailingStore), 5, true);

        let response = app.oneshot(request(Some("ws_1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(LIMIT_HEADER).is_none());
    }
}
