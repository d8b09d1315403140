use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::metrics;
use crate::models::{EmailStatus, SendEmailRequest, SendEmailResponse};

/// Hands accepted emails off for delivery.
///
/// Delivery itself (rendering, MTA) happens downstream; this service assigns
/// the email id the client sees and records the hand-off.
///
/// # Counter Memory Ordering
///
/// `dispatched` is a monotonic counter used only for reporting, so it uses
/// `Ordering::Relaxed`.
#[derive(Debug, Clone, Default)]
pub struct DispatchService {
    dispatched: Arc<AtomicU64>,
}

impl DispatchService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an email for delivery on behalf of `workspace_id`.
    #[instrument(skip(self, request), fields(recipients = request.to.len()))]
    pub fn dispatch(&self, workspace_id: &str, request: &SendEmailRequest) -> SendEmailResponse {
        let id = Uuid::new_v4();
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::record_email_dispatched();

        info!(%id, workspace_id, "Email accepted for delivery");

        SendEmailResponse {
            id,
            status: EmailStatus::Queued,
            from: request.from.clone(),
            to: request.to.clone(),
            subject: request.subject.clone(),
            created_at: Utc::now(),
        }
    }

    /// Total emails accepted by this process.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}
