//! Email submission endpoint.
//!
//! # Endpoint
//!
//! - `POST /v1/emails` - Accept an email for delivery
//!
//! # Idempotency
//!
//! With an `Idempotency-Key` header the request runs under
//! [`IdempotentExecutor`](crate::services::IdempotentExecutor), scoped to the
//! workspace:
//!
//! | Situation | Response |
//! |-----------|----------|
//! | first request | 201, email accepted |
//! | same key, same body, completed | 201 with the original body, `Idempotent-Replayed: true` |
//! | same key, same body, still running | 409 `request_in_progress`, `Retry-After: 1` |
//! | same key, different body | 409 `idempotency_conflict` |
//!
//! Without the header every request is accepted independently.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::util::{
    IDEMPOTENT_REPLAYED_HEADER, idempotency_key, scoped_idempotency_key, workspace_id,
};
use crate::error::{AppError, AppResult};
use crate::models::SendEmailRequest;
use crate::services::IdempotentOutcome;
use crate::state::AppState;
use crate::validation::validate_send_email;

/// Accept an email for delivery.
///
/// The body is hashed as received for idempotency, so clients must resend
/// the same JSON object (key order does not matter) when retrying.
///
/// # Request Body
///
/// ```json
/// {
///   "from": "noreply@example.com",
///   "to": ["user@example.com"],
///   "subject": "Welcome",
///   "text": "Hello"
/// }
/// ```
#[instrument(skip(state, headers, body))]
pub async fn send_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let workspace = workspace_id(&headers)?;
    let request: SendEmailRequest = serde_json::from_value(body.clone())?;
    validate_send_email(&request)?;

    let Some(key) = idempotency_key(&headers)? else {
        let response = state.dispatch.dispatch(&workspace, &request);
        return Ok((StatusCode::CREATED, Json(response)).into_response());
    };

    let scoped_key = scoped_idempotency_key(&workspace, &key);
    let dispatch = &state.dispatch;
    let workspace_ref = workspace.as_str();
    let request = &request;
    let outcome = state
        .executor
        .run(&scoped_key, &body, move || async move {
            let response = dispatch.dispatch(workspace_ref, request);
            Ok::<_, AppError>(serde_json::to_value(response)?)
        })
        .await?;

    match outcome {
        IdempotentOutcome::Executed(result) => {
            debug!(workspace = %workspace, key = %key, "Email accepted under idempotency key");
            Ok((StatusCode::CREATED, Json(result)).into_response())
        }
        IdempotentOutcome::Replayed(stored) => {
            info!(workspace = %workspace, key = %key, "Replaying stored response");
            Ok((
                StatusCode::CREATED,
                [(IDEMPOTENT_REPLAYED_HEADER, "true")],
                Json(stored.result),
            )
                .into_response())
        }
        IdempotentOutcome::InFlight => Err(AppError::RequestInProgress(key)),
    }
}
