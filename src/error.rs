use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::idempotency::IdempotencyError;
use crate::limiter::RateLimitError;
use crate::metrics;
use crate::store::StoreError;

/// Seconds a client should wait before retrying a request that is still in flight.
pub const IN_FLIGHT_RETRY_AFTER_SECS: u64 = 1;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Coordination errors arrive through `From` impls so handlers can use `?`
/// directly on limiter, coordinator and store calls:
///
/// | Source | Variant | Status |
/// |--------|---------|--------|
/// | `IdempotencyError::Conflict` | `IdempotencyConflict` | 409 |
/// | in-flight duplicate | `RequestInProgress` | 409 + `Retry-After` |
/// | any `StoreError` | `StoreUnavailable` | 503 |
/// | `RateLimitError::InvalidConfig` | `ConfigError` | 500 |
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Idempotency conflict: {0}")]
    IdempotencyConflict(String),

    #[error("Request still in progress for idempotency key '{0}'")]
    RequestInProgress(String),

    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        metrics::record_store_error("store");
        AppError::StoreUnavailable(err.to_string())
    }
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::InvalidConfig(msg) => AppError::ConfigError(msg),
            RateLimitError::Store(e) => {
                metrics::record_store_error("rate_limit");
                AppError::StoreUnavailable(e.to_string())
            }
        }
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::Conflict { key } => AppError::IdempotencyConflict(key),
            IdempotencyError::Store(e) => {
                metrics::record_store_error("idempotency");
                AppError::StoreUnavailable(e.to_string())
            }
        }
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        match &self {
            AppError::BadRequest(_)
            | AppError::NotFound(_)
            | AppError::SerializationError(_)
            | AppError::IdempotencyConflict(_)
            | AppError::RequestInProgress(_) => {
                tracing::warn!(error = %self, "Request rejected");
            }
            _ => tracing::error!(error = %self, "Request failed"),
        }

        let (status, error_type, message) = match &self {
            AppError::IdempotencyConflict(_) => (
                StatusCode::CONFLICT,
                "idempotency_conflict",
                "This idempotency key was already used with a different request body.",
            ),
            AppError::RequestInProgress(_) => {
                let body = ErrorResponse {
                    error: "request_in_progress".to_string(),
                    message: "A request with this idempotency key is still being processed. \
                              Please retry shortly."
                        .to_string(),
                    details: None,
                };
                let mut response = (StatusCode::CONFLICT, axum::Json(body)).into_response();
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(IN_FLIGHT_RETRY_AFTER_SECS),
                );
                return response;
            }

            // Don't leak store connection details
            AppError::StoreUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "Request coordination is temporarily unavailable. Please try again later.",
            ),

            // Internal errors - never expose internal details to clients
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred. Please contact support if the issue persists.",
            ),
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Service configuration error. Please contact support.",
            ),

            // Client errors - safe to show the message as it's user-facing
            AppError::SerializationError(e) => {
                let sanitized = sanitize_serde_error(e);
                return (
                    StatusCode::BAD_REQUEST,
                    axum::Json(ErrorResponse {
                        error: "serialization_error".to_string(),
                        message: sanitized,
                        details: None,
                    }),
                )
                    .into_response();
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: message.to_string(),
            details: None,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Unknown field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn test_conflict_maps_to_409() {
        let err: AppError = IdempotencyError::Conflict {
            key: "req-42".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::IdempotencyConflict(ref k) if k == "req-42"));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_in_progress_sets_retry_after() {
        let response = AppError::RequestInProgress("k".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }

    #[test]
    fn test_store_errors_map_to_503() {
        let from_limiter: AppError =
            RateLimitError::Store(StoreError::Unavailable("refused".to_string())).into();
        let from_coordinator: AppError =
            IdempotencyError::Store(StoreError::Unavailable("refused".to_string())).into();

        for err in [from_limiter, from_coordinator] {
            assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[test]
    fn test_invalid_limiter_config_is_internal() {
        let err: AppError = RateLimitError::InvalidConfig("max_tokens".to_string()).into();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_sanitize_missing_field() {
        let err = serde_json::from_str::<crate::models::SendEmailRequest>(r#"{"to": []}"#)
            .unwrap_err();
        assert_eq!(sanitize_serde_error(&err), "Missing required field: from");
    }

    #[test]
    fn test_sanitize_malformed_json() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(sanitize_serde_error(&err), "Malformed JSON in request body");
    }
}
