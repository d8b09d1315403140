//! Fuzz testing for request validation.
//!
//! Validation runs on untrusted header values and request bodies before
//! anything touches the coordination store. This target checks that it:
//!
//! - Never panics on any input
//! - Accepts only idempotency keys and workspace ids that are visible ASCII
//!   and at most 255 bytes long
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the validation fuzz target
//! cargo +nightly fuzz run fuzz_validation
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mailer_guard::models::SendEmailRequest;
use mailer_guard::validation::{
    MAX_TOKEN_LENGTH, validate_email_address, validate_idempotency_key, validate_send_email,
    validate_workspace_id,
};

#[derive(Debug, Arbitrary)]
struct Input {
    token: String,
    from: String,
    to: Vec<String>,
    subject: String,
    html: Option<String>,
    text: Option<String>,
    reply_to: Option<String>,
}

fuzz_target!(|input: Input| {
    let token_ok = !input.token.is_empty()
        && input.token.len() <= MAX_TOKEN_LENGTH
        && input.token.chars().all(|c| c.is_ascii_graphic());

    assert_eq!(validate_idempotency_key(&input.token).is_ok(), token_ok);
    if validate_workspace_id(&input.token).is_ok() {
        assert!(token_ok && !input.token.contains(':'));
    }

    let _ = validate_email_address(&input.from, "Sender");

    let request = SendEmailRequest {
        from: input.from,
        to: input.to,
        subject: input.subject,
        html: input.html,
        text: input.text,
        reply_to: input.reply_to,
    };
    let _ = validate_send_email(&request);
});
