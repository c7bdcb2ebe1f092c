use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::info;

use crate::jobs::job::{
    AuditDetails, AuditPayload, EmailPayload, Job, JobKind, NotificationPayload,
};
use crate::jobs::queue::{JobHandler, JobQueue};
use crate::jobs::sinks::{AuditSink, Mailer};

/// Production handler for every job kind.
///
/// An approval notification fans out into exactly one email job and one
/// audit-log job; those two kinds are terminal. Follow-on ids derive from the
/// notification's id, so a retried notification does not enqueue duplicates.
pub struct NotificationProcessor {
    mailer: Arc<dyn Mailer>,
    audit: Arc<dyn AuditSink>,
}

impl NotificationProcessor {
    pub fn new(mailer: Arc<dyn Mailer>, audit: Arc<dyn AuditSink>) -> Self {
        Self { mailer, audit }
    }

    async fn notify(&self, job: &Job, queue: &dyn JobQueue) -> anyhow::Result<()> {
        let n: NotificationPayload = job.decode()?;
        info!(user_id = %n.user_id, action = %n.action, "processing approval notification");

        let email = EmailPayload {
            to: n.email.clone(),
            subject: format!("Account {}", n.action),
            message: n.message(),
            user_id: Some(n.user_id),
            admin_id: Some(n.admin_id),
        };
        queue
            .enqueue_with_id(
                job.follow_on_id(JobKind::Email),
                JobKind::Email,
                serde_json::to_value(&email)?,
            )
            .await?;

        let audit = AuditPayload {
            action: format!("user_{}", n.action),
            user_id: n.user_id,
            admin_id: n.admin_id,
            details: AuditDetails {
                user_email: n.email,
                user_name: n.display_name,
                rejection_reason: n.rejection_reason,
            },
            timestamp: OffsetDateTime::now_utc(),
        };
        queue
            .enqueue_with_id(
                job.follow_on_id(JobKind::AuditLog),
                JobKind::AuditLog,
                serde_json::to_value(&audit)?,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for NotificationProcessor {
    async fn handle(&self, job: &Job, queue: &dyn JobQueue) -> anyhow::Result<()> {
        match job.kind {
            JobKind::ApprovalNotification => self.notify(job, queue).await,
            JobKind::Email => self.mailer.send(&job.decode()?).await,
            JobKind::AuditLog => self.audit.record(&job.decode()?).await,
        }
    }
}
