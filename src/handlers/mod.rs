mod admin;
mod emails;
mod health;
pub mod util;

pub use admin::{
    cleanup_idempotency, get_idempotency_result, get_rate_limit, release_idempotency_lock,
    reset_rate_limit,
};
pub use emails::send_email;
pub use health::{health_check, readiness_check};
