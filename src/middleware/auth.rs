//! Admin key authentication middleware.
//!
//! Guards the `/admin` routes, which can reset rate limits and drop
//! idempotency records for any workspace.
//!
//! # Security Features
//!
//! - **Constant-time comparison**: Prevents timing attacks on key validation
//! - **Header only**: The key is read from `X-Admin-Key`; query parameters are
//!   never consulted so the key cannot end up in access logs
//!
//! # Usage
//!
//! ```bash
//! ADMIN_API_KEY=your-secret-key cargo run
//! curl -H "X-Admin-Key: your-secret-key" http://localhost:3000/admin/rate-limits/ws_1
//! ```
//!
//! When `ADMIN_API_KEY` is unset the admin routes are not mounted at all, so
//! this layer always has a key to compare against.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::json;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Header name for the admin key.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Admin key authentication layer.
#[derive(Clone)]
pub struct AdminKeyAuth {
    expected_key: Arc<String>,
}

impl AdminKeyAuth {
    pub fn new(admin_key: String) -> Self {
        Self {
            expected_key: Arc::new(admin_key),
        }
    }
}

impl<S> Layer<S> for AdminKeyAuth {
    type Service = AdminKeyAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdminKeyAuthService {
            inner,
            expected_key: self.expected_key.clone(),
        }
    }
}

/// Admin key authentication service wrapper.
#[derive(Clone)]
pub struct AdminKeyAuthService<S> {
    inner: S,
    expected_key: Arc<String>,
}

impl<S> Service<Request<Body>> for AdminKeyAuthService<S>
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
        let expected = self.expected_key.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let provided = req
                .headers()
                .get(ADMIN_KEY_HEADER)
                .and_then(|v| v.to_str().ok());

            match provided {
                Some(key) if constant_time_eq(key, &expected) => {
                    debug!(path = %req.uri().path(), "Admin key authentication successful");
                    inner.call(req).await
                }
                Some(_) => {
                    warn!(path = %req.uri().path(), "Invalid admin key provided");
                    Ok(unauthorized_response("Invalid admin key"))
                }
                None => {
                    warn!(path = %req.uri().path(), "Missing admin key");
                    Ok(unauthorized_response("Admin key required"))
                }
            }
        })
    }
}

/// Perform constant-time comparison of two strings.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Build an unauthorized (401) response.
fn unauthorized_response(message: &str) -> Response<Body> {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Admin-Key")],
        Json(json!({"error": "unauthorized", "message": message})),
    )
        .into_response()
}
