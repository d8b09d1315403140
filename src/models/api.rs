use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Request to send an email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendEmailRequest {
    /// Sender address
    pub from: String,
    /// Recipient addresses (1 to 50)
    pub to: Vec<String>,
    pub subject: String,
    /// HTML body (at least one of `html` / `text` is required)
    #[serde(default)]
    pub html: Option<String>,
    /// Plain-text body
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

/// Delivery state reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Queued,
}

/// Response after an email was accepted.
///
/// This is also the body stored as the idempotent result, so a replayed
/// response is byte-for-byte the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmailResponse {
    /// Email ID assigned on acceptance
    pub id: Uuid,
    pub status: EmailStatus,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    /// Acceptance timestamp
    pub created_at: DateTime<Utc>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    /// Whether the coordination store answered the last probe
    pub store_connected: bool,
    /// Configured store backend (`redis` or `memory`)
    pub store_backend: String,
    /// Service version
    pub version: String,
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Current bucket state for one identifier.
#[derive(Debug, Serialize)]
pub struct RateLimitInfoResponse {
    pub identifier: String,
    pub tokens_remaining: u32,
    pub max_tokens: u32,
    /// Epoch seconds at which the bucket will be full again
    pub reset_at: i64,
}

/// Stored idempotent result for one key.
#[derive(Debug, Serialize)]
pub struct IdempotencyRecordResponse {
    pub key: String,
    pub result: Value,
    pub body_hash: String,
    /// Epoch milliseconds at which the result was stored
    pub stored_at: i64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_send_email_request_optional_fields() {
        let json = r#"{"from": "a@example.com", "to": ["b@example.com"], "subject": "Hi", "text": "Hello"}"#;
        let request: SendEmailRequest =
            serde_json::from_str(json).expect("Deserialization should succeed");

        assert_eq!(request.to.len(), 1);
        assert_eq!(request.text.as_deref(), Some("Hello"));
        assert!(request.html.is_none());
        assert!(request.reply_to.is_none());
    }

    #[test]
    fn test_send_email_request_rejects_unknown_fields() {
        let json = r#"{"from": "a@example.com", "to": [], "subject": "Hi", "bcc": "x"}"#;
        let err = serde_json::from_str::<SendEmailRequest>(json).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_send_email_response_serialization() {
        let response = SendEmailResponse {
            id: Uuid::new_v4(),
            status: EmailStatus::Queued,
            from: "a@example.com".to_string(),
            to: vec!["b@example.com".to_string()],
            subject: "Hi".to_string(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"queued\""));
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            store_connected: true,
            store_backend: "memory".to_string(),
            version: "0.1.0".to_string(),
            uptime_seconds: 5,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"store_connected\":true"));
    }
}
