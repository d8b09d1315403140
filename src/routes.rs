//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets and propagates X-Request-Id
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limit /    │ ← 429 on /v1 routes
//! │  Admin Key Auth  │ ← 401 on /admin routes
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/ready` - Health & monitoring (never limited)
//! - `/v1/emails` - Email submission (rate limited per workspace)
//! - `/admin/*` - Operator endpoints (mounted only with `ADMIN_API_KEY`)

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{AdminKeyAuth, RateLimitLayer};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Middleware Configuration
///
/// - **Rate Limiting**: on `/v1` routes when `RATE_LIMIT_MAX_TOKENS > 0`
/// - **Admin routes**: mounted behind `X-Admin-Key` when `ADMIN_API_KEY` is set
/// - **CORS**: Configured from `cors_allowed_origins`
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut api = Router::new().route("/v1/emails", post(handlers::send_email));

    match &state.limiter {
        Some(limiter) => {
            info!(
                max_tokens = config.rate_limit_max_tokens,
                refill_rate = config.rate_limit_refill_rate,
                fail_open = config.rate_limit_fail_open,
                "Rate limiting enabled"
            );
            api = api.route_layer(RateLimitLayer::new(
                limiter.clone(),
                config.rate_limit_fail_open,
            ));
        }
        None => info!("Rate limiting disabled (RATE_LIMIT_MAX_TOKENS=0)"),
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .merge(api);

    if let Some(admin_key) = &config.admin_api_key {
        info!("Admin endpoints enabled");
        router = router.merge(admin_routes().route_layer(AdminKeyAuth::new(admin_key.clone())));
    } else {
        info!("Admin endpoints disabled (no ADMIN_API_KEY set)");
    }

    info!(
        max_size_kb = config.max_request_body_size / 1024,
        "Request body size limit configured"
    );

    router
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(build_cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/rate-limits/{identifier}",
            get(handlers::get_rate_limit).delete(handlers::reset_rate_limit),
        )
        .route(
            "/admin/idempotency/{workspace}/{key}",
            get(handlers::get_idempotency_result).delete(handlers::cleanup_idempotency),
        )
        .route(
            "/admin/idempotency/{workspace}/{key}/lock",
            delete(handlers::release_idempotency_lock),
        )
}

/// Build CORS layer from configuration.
///
/// `["*"]` allows any origin. Convenient for development; list explicit
/// origins in production.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
