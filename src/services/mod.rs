//! Application services used by the HTTP handlers.

mod dispatch;
mod idempotent;

pub use dispatch::DispatchService;
pub use idempotent::{IdempotentExecutor, IdempotentOutcome};
