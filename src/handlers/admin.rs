//! Operator endpoints over the rate limiter and idempotency records.
//!
//! Mounted under `/admin` only when `ADMIN_API_KEY` is set.
//!
//! Path segments are percent-decoded, so an idempotency key containing `/`
//! (or any other reserved character) is addressed in encoded form:
//! `/admin/idempotency/ws_1/a%2Fb` names the key `a/b`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::{info, instrument};

use super::util::scoped_idempotency_key;
use crate::error::{AppError, AppResult};
use crate::limiter::TokenBucketLimiter;
use crate::models::{IdempotencyRecordResponse, RateLimitInfoResponse};
use crate::state::AppState;
use crate::validation::{validate_idempotency_key, validate_workspace_id};

fn limiter(state: &AppState) -> AppResult<&TokenBucketLimiter> {
    state
        .limiter
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Rate limiting is disabled".to_string()))
}

fn scoped_key(workspace: &str, key: &str) -> AppResult<String> {
    validate_workspace_id(workspace)?;
    validate_idempotency_key(key)?;
    Ok(scoped_idempotency_key(workspace, key))
}

/// Current bucket state for a workspace.
#[instrument(skip(state))]
pub async fn get_rate_limit(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> AppResult<Json<RateLimitInfoResponse>> {
    validate_workspace_id(&identifier)?;
    let info = limiter(&state)?.get_info(&identifier).await?;

    Ok(Json(RateLimitInfoResponse {
        identifier,
        tokens_remaining: info.tokens_remaining,
        max_tokens: info.max_tokens,
        reset_at: info.reset_at,
    }))
}

/// Refill a workspace's bucket by deleting it.
#[instrument(skip(state))]
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> AppResult<StatusCode> {
    validate_workspace_id(&identifier)?;
    limiter(&state)?.reset(&identifier).await?;

    info!(identifier = %identifier, "Rate limit reset by admin");
    Ok(StatusCode::NO_CONTENT)
}

/// Stored result for an idempotency key.
#[instrument(skip(state))]
pub async fn get_idempotency_result(
    State(state): State<AppState>,
    Path((workspace, key)): Path<(String, String)>,
) -> AppResult<Json<IdempotencyRecordResponse>> {
    let scoped = scoped_key(&workspace, &key)?;
    let stored = state
        .executor
        .coordinator()
        .get_result(&scoped)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No stored result for key '{key}'")))?;

    Ok(Json(IdempotencyRecordResponse {
        key,
        result: stored.result,
        body_hash: stored.body_hash,
        stored_at: stored.timestamp,
    }))
}

/// Drop a stuck processing lock.
#[instrument(skip(state))]
pub async fn release_idempotency_lock(
    State(state): State<AppState>,
    Path((workspace, key)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let scoped = scoped_key(&workspace, &key)?;
    state.executor.coordinator().release_lock(&scoped).await?;

    info!(workspace = %workspace, key = %key, "Idempotency lock released by admin");
    Ok(StatusCode::NO_CONTENT)
}

/// Drop both the lock and the stored result.
#[instrument(skip(state))]
pub async fn cleanup_idempotency(
    State(state): State<AppState>,
    Path((workspace, key)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let scoped = scoped_key(&workspace, &key)?;
    state.executor.coordinator().cleanup(&scoped).await?;

    info!(workspace = %workspace, key = %key, "Idempotency record cleaned up by admin");
    Ok(StatusCode::NO_CONTENT)
}
