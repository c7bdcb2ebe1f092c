//! PENDING -> APPROVED | REJECTED state machine.
//!
//! The status change is committed by one conditional store update before the
//! notification job is enqueued. A failed enqueue is logged and never rolls
//! the transition back.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::jobs::job::{JobKind, NotificationPayload};
use crate::jobs::queue::JobQueue;
use crate::users::model::{DecideOutcome, Decision, User};
use crate::users::store::UserStore;

#[derive(Clone)]
pub struct ApprovalWorkflow {
    users: Arc<dyn UserStore>,
    jobs: Arc<dyn JobQueue>,
}

impl ApprovalWorkflow {
    pub fn new(users: Arc<dyn UserStore>, jobs: Arc<dyn JobQueue>) -> Self {
        Self { users, jobs }
    }

    pub async fn approve(&self, user_id: Uuid, admin_id: Uuid) -> AppResult<User> {
        self.decide(user_id, admin_id, Decision::Approve).await
    }

    pub async fn reject(&self, user_id: Uuid, admin_id: Uuid, reason: String) -> AppResult<User> {
        self.decide(user_id, admin_id, Decision::Reject { reason })
            .await
    }

    /// Rejections need a non-blank reason; it is stored trimmed.
    fn checked(decision: Decision) -> AppResult<Decision> {
        match decision {
            Decision::Reject { reason } => match reason.trim() {
                "" => Err(AppError::invalid(
                    "rejectionReason",
                    "Rejection reason is required when rejecting a user",
                )),
                trimmed => Ok(Decision::Reject {
                    reason: trimmed.to_owned(),
                }),
            },
            approve => Ok(approve),
        }
    }

    #[instrument(skip(self), fields(action = decision.action()))]
    pub async fn decide(
        &self,
        user_id: Uuid,
        admin_id: Uuid,
        decision: Decision,
    ) -> AppResult<User> {
        let decision = Self::checked(decision)?;
        let user = match self.users.decide(user_id, admin_id, &decision).await? {
            DecideOutcome::Applied(user) => user,
            DecideOutcome::Missing => return Err(AppError::NotFound("User not found".into())),
            DecideOutcome::NotPending(current) => {
                warn!(%user_id, %current, "transition refused");
                return Err(AppError::Conflict("User is not in pending status".into()));
            }
        };
        info!(%user_id, %admin_id, email = %user.email, "user {}", decision.action());

        let payload = NotificationPayload {
            user_id: user.id,
            email: user.email.clone(),
            display_name: user.display_name(),
            action: decision.action().to_owned(),
            admin_id,
            rejection_reason: decision.reason().map(str::to_owned),
        };
        if let Err(e) = self
            .jobs
            .as_ref()
            .enqueue_json(JobKind::ApprovalNotification, &payload)
            .await
        {
            warn!(%user_id, error = %e, "approval notification not enqueued");
        }

        Ok(user)
    }
}
