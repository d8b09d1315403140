use crate::error::{AppError, AppResult};
use crate::models::SendEmailRequest;

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length for idempotency keys and workspace identifiers.
pub const MAX_TOKEN_LENGTH: usize = 255;

/// Maximum number of recipients in a single email.
pub const MAX_RECIPIENTS: usize = 50;

/// Maximum length for an email address (RFC 5321 path limit).
pub const MAX_ADDRESS_LENGTH: usize = 320;

/// Maximum length for a subject line.
pub const MAX_SUBJECT_LENGTH: usize = 998;

/// Validate an opaque caller-supplied token used in store keys.
///
/// Rules:
/// - Must be between 1 and 255 characters
/// - Must only contain visible ASCII (no whitespace or control characters)
fn validate_token(value: &str, label: &str) -> AppResult<()> {
    if value.is_empty() {
        return Err(AppError::BadRequest(format!("{label} cannot be empty")));
    }

    if value.len() > MAX_TOKEN_LENGTH {
        return Err(AppError::BadRequest(format!(
            "{label} cannot exceed {MAX_TOKEN_LENGTH} characters (got {})",
            value.len()
        )));
    }

    if let Some(pos) = value.chars().position(|c| !c.is_ascii_graphic()) {
        return Err(AppError::BadRequest(format!(
            "{label} contains invalid character at position {pos}. \
             Only visible ASCII characters are allowed"
        )));
    }

    Ok(())
}

/// Validate an `Idempotency-Key` header value.
pub fn validate_idempotency_key(key: &str) -> AppResult<()> {
    validate_token(key, "Idempotency key")
}

/// Validate an `X-Workspace-Id` header value.
///
/// Same rules as idempotency keys, and additionally no `:`, which separates
/// the workspace from the client key in scoped idempotency keys.
pub fn validate_workspace_id(workspace_id: &str) -> AppResult<()> {
    validate_token(workspace_id, "Workspace id")?;

    if workspace_id.contains(':') {
        return Err(AppError::BadRequest(
            "Workspace id cannot contain ':'".to_string(),
        ));
    }

    Ok(())
}

/// Validate a single email address.
///
/// Deliberately loose: a non-empty local part and domain around a single
/// `@`, no whitespace. Deliverability is checked downstream.
pub fn validate_email_address(address: &str, field: &str) -> AppResult<()> {
    if address.len() > MAX_ADDRESS_LENGTH {
        return Err(AppError::BadRequest(format!(
            "{field} address cannot exceed {MAX_ADDRESS_LENGTH} characters"
        )));
    }

    let valid = match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !address.chars().any(|c| c.is_whitespace() || c.is_control())
        }
        None => false,
    };

    if !valid {
        return Err(AppError::BadRequest(format!(
            "{field} address '{address}' is not a valid email address"
        )));
    }

    Ok(())
}

/// Validate an email send request.
///
/// Rules:
/// - `from` must be a valid address
/// - `to` must hold between 1 and 50 valid addresses
/// - `subject` must be non-blank and at most 998 characters
/// - at least one of `html` / `text` must be present and non-empty
/// - `reply_to`, when present, must be a valid address
pub fn validate_send_email(request: &SendEmailRequest) -> AppResult<()> {
    validate_email_address(&request.from, "Sender")?;

    if request.to.is_empty() {
        return Err(AppError::BadRequest(
            "At least one recipient is required".to_string(),
        ));
    }

    if request.to.len() > MAX_RECIPIENTS {
        return Err(AppError::BadRequest(format!(
            "Cannot send to more than {MAX_RECIPIENTS} recipients (got {})",
            request.to.len()
        )));
    }

    for recipient in &request.to {
        validate_email_address(recipient, "Recipient")?;
    }

    if request.subject.trim().is_empty() {
        return Err(AppError::BadRequest("Subject cannot be empty".to_string()));
    }

    if request.subject.len() > MAX_SUBJECT_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Subject cannot exceed {MAX_SUBJECT_LENGTH} characters"
        )));
    }

    let has_body = [&request.html, &request.text]
        .into_iter()
        .any(|part| part.as_deref().is_some_and(|s| !s.trim().is_empty()));
    if !has_body {
        return Err(AppError::BadRequest(
            "Either html or text content is required".to_string(),
        ));
    }

    if let Some(reply_to) = &request.reply_to {
        validate_email_address(reply_to, "Reply-to")?;
    }

    Ok(())
}
