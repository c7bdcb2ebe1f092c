use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ApprovalNotification,
    AuditLog,
    Email,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::ApprovalNotification, JobKind::AuditLog, JobKind::Email];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::ApprovalNotification => "approval-notification",
            JobKind::AuditLog => "audit-log",
            JobKind::Email => "email",
        }
    }

    /// Key the kind is reported under in queue statistics.
    pub fn stats_key(self) -> &'static str {
        match self {
            JobKind::ApprovalNotification => "approvalNotifications",
            JobKind::AuditLog => "auditLogs",
            JobKind::Email => "emails",
        }
    }

    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            JobKind::ApprovalNotification | JobKind::AuditLog => RetryPolicy::exponential(3),
            JobKind::Email => RetryPolicy::exponential(5),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown job kind {s}"))
    }
}

/// Attempt ceiling plus exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const BASE_DELAY: Duration = Duration::from_secs(2);

    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Self::BASE_DELAY,
        }
    }

    /// Delay before the attempt following `attempt` (1-based): base, 2*base, 4*base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay * 2u32.pow(exp)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// One unit of work as seen by a handler.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub attempt: u32,
}

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self::with_id(Uuid::new_v4(), kind, payload)
    }

    pub fn with_id(id: Uuid, kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            id,
            kind,
            payload,
            attempt: 1,
        }
    }

    /// Id of the `kind` job this job spawns. Stable across retries of this job,
    /// so a re-run enqueues the same follow-on rather than a second one.
    pub fn follow_on_id(&self, kind: JobKind) -> Uuid {
        Uuid::new_v5(&self.id, kind.as_str().as_bytes())
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> anyhow::Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| anyhow::anyhow!("malformed {} payload: {}", self.kind, e))
    }
}

/// Acknowledgement returned by `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub kind: JobKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub action: String,
    pub admin_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl NotificationPayload {
    /// Human-readable text sent to the applicant.
    pub fn message(&self) -> String {
        match self.rejection_reason.as_deref() {
            Some(reason) if self.action == "rejected" => format!(
                "Hello {}, your account has been rejected. Reason: {}",
                self.display_name, reason
            ),
            _ if self.action == "rejected" => format!(
                "Hello {}, your account has been rejected.",
                self.display_name
            ),
            _ => format!(
                "Congratulations {}! Your account has been approved.",
                self.display_name
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPayload {
    pub to: String,
    pub subject: String,
    pub message: String,
    pub user_id: Option<Uuid>,
    pub admin_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDetails {
    pub user_email: String,
    pub user_name: String,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPayload {
    pub action: String,
    pub user_id: Uuid,
    pub admin_id: Uuid,
    pub details: AuditDetails,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_ceilings_per_kind() {
        assert_eq!(JobKind::ApprovalNotification.retry_policy().max_attempts, 3);
        assert_eq!(JobKind::AuditLog.retry_policy().max_attempts, 3);
        assert_eq!(JobKind::Email.retry_policy().max_attempts, 5);
    }

    #[test]
    fn backoff_doubles_from_two_seconds() {
        let p = JobKind::Email.retry_policy();
        assert_eq!(p.delay_after(1), Duration::from_secs(2));
        assert_eq!(p.delay_after(2), Duration::from_secs(4));
        assert_eq!(p.delay_after(3), Duration::from_secs(8));
        assert!(p.should_retry(4));
        assert!(!p.should_retry(5));
    }

    #[test]
    fn follow_on_ids_are_stable_per_parent_and_kind() {
        let job = Job::new(JobKind::ApprovalNotification, serde_json::json!({}));
        let retried = Job {
            attempt: 2,
            ..job.clone()
        };
        assert_eq!(
            job.follow_on_id(JobKind::Email),
            retried.follow_on_id(JobKind::Email)
        );
        assert_ne!(
            job.follow_on_id(JobKind::Email),
            job.follow_on_id(JobKind::AuditLog)
        );

        let other = Job::new(JobKind::ApprovalNotification, serde_json::json!({}));
        assert_ne!(
            job.follow_on_id(JobKind::Email),
            other.follow_on_id(JobKind::Email)
        );
    }

    #[test]
    fn kind_names_round_trip_through_storage_text() {
        for kind in JobKind::ALL {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        assert!("sms".parse::<JobKind>().is_err());
    }

    #[test]
    fn rejection_message_includes_reason() {
        let p = NotificationPayload {
            user_id: Uuid::new_v4(),
            email: "b@example.com".into(),
            display_name: "Bob Stone".into(),
            action: "rejected".into(),
            admin_id: Uuid::new_v4(),
            rejection_reason: Some("incomplete info".into()),
        };
        assert_eq!(
            p.message(),
            "Hello Bob Stone, your account has been rejected. Reason: incomplete info"
        );

        let approved = NotificationPayload {
            action: "approved".into(),
            rejection_reason: None,
            ..p
        };
        assert!(approved.message().starts_with("Congratulations Bob Stone!"));
    }
}
