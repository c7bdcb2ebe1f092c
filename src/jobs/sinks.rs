use async_trait::async_trait;
use tracing::info;

use crate::jobs::job::{AuditPayload, EmailPayload};

/// Outbound email delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &EmailPayload) -> anyhow::Result<()>;
}

/// Destination for audit-trail entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditPayload) -> anyhow::Result<()>;
}

/// Writes emails to the log instead of sending them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &EmailPayload) -> anyhow::Result<()> {
        info!(
            to = %email.to,
            subject = %email.subject,
            message = %email.message,
            "email notification sent"
        );
        Ok(())
    }
}

pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, entry: &AuditPayload) -> anyhow::Result<()> {
        info!(
            action = %entry.action,
            user_id = %entry.user_id,
            admin_id = %entry.admin_id,
            details = ?entry.details,
            "audit entry created"
        );
        Ok(())
    }
}
