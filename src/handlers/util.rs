//! Shared utilities for handlers and middleware.

use axum::http::HeaderMap;

use crate::error::{AppError, AppResult};
use crate::validation::{validate_idempotency_key, validate_workspace_id};

/// Header identifying the tenant a request is charged to.
pub const WORKSPACE_HEADER: &str = "x-workspace-id";

/// Client-supplied deduplication key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Set to `true` on responses served from a stored idempotent result.
pub const IDEMPOTENT_REPLAYED_HEADER: &str = "idempotent-replayed";

/// Extract and validate the `X-Workspace-Id` header.
pub fn workspace_id(headers: &HeaderMap) -> AppResult<String> {
    let value = headers
        .get(WORKSPACE_HEADER)
        .ok_or_else(|| AppError::BadRequest("Missing X-Workspace-Id header".to_string()))?
        .to_str()
        .map_err(|_| AppError::BadRequest("X-Workspace-Id must be visible ASCII".to_string()))?;

    validate_workspace_id(value)?;
    Ok(value.to_string())
}

/// Extract and validate the optional `Idempotency-Key` header.
pub fn idempotency_key(headers: &HeaderMap) -> AppResult<Option<String>> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::BadRequest("Idempotency-Key must be visible ASCII".to_string()))?;

    validate_idempotency_key(value)?;
    Ok(Some(value.to_string()))
}

/// Store key for an idempotency key within one workspace.
///
/// Workspace ids never contain `:`, so the first separator is unambiguous and
/// two workspaces can't collide on the same client key.
pub fn scoped_idempotency_key(workspace_id: &str, key: &str) -> String {
    format!("{workspace_id}:{key}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_workspace_id_present() {
        let mut headers = HeaderMap::new();
        headers.insert(WORKSPACE_HEADER, HeaderValue::from_static("ws_123"));
        assert_eq!(workspace_id(&headers).unwrap(), "ws_123");
    }

    #[test]
    fn test_workspace_id_missing() {
        let err = workspace_id(&HeaderMap::new()).unwrap_err();
        assert!(err.to_string().contains("Missing X-Workspace-Id"));
    }

    #[test]
    fn test_idempotency_key_optional() {
        assert!(idempotency_key(&HeaderMap::new()).unwrap().is_none());

        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("req-42"));
        assert_eq!(idempotency_key(&headers).unwrap().as_deref(), Some("req-42"));
    }

    #[test]
    fn test_idempotency_key_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("has space"));
        assert!(idempotency_key(&headers).is_err());
    }

    #[test]
    fn test_scoped_key() {
        assert_eq!(scoped_idempotency_key("ws_1", "req-42"), "ws_1:req-42");
        assert_ne!(
            scoped_idempotency_key("ws_1", "a:b"),
            scoped_idempotency_key("ws_2", "a:b")
        );
    }
}
