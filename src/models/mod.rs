mod api;

pub use api::{
    EmailStatus, HealthResponse, IdempotencyRecordResponse, RateLimitInfoResponse,
    SendEmailRequest, SendEmailResponse,
};
