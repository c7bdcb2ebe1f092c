use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::users::model::{
    ApproverSummary, DecideOutcome, Decision, NewUser, ProfileUpdate, SearchFilter, Status, User,
    UserStats,
};

/// Outcome of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AdminProtected,
    Missing,
}

/// Durable keyed storage for user records.
///
/// Every mutating call is a single atomic store operation; callers never
/// read-validate-write across two calls.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a record. Duplicate emails (case-insensitive) fail with `Conflict`.
    async fn create(&self, user: NewUser) -> AppResult<User>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>>;

    /// Case-insensitive email lookup.
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;

    /// USER-role records in `status`; pending oldest first, others newest first.
    async fn list_by_status(&self, status: Status) -> AppResult<Vec<User>>;

    async fn search(&self, filter: &SearchFilter) -> AppResult<Vec<User>>;

    async fn count_by_status(&self) -> AppResult<UserStats>;

    /// Moves a PENDING record to the decision's status in one conditional update.
    async fn decide(&self, id: Uuid, admin_id: Uuid, decision: &Decision)
        -> AppResult<DecideOutcome>;

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> AppResult<Option<User>>;

    async fn record_login(&self, id: Uuid) -> AppResult<()>;

    /// Hard delete; ADMIN records are never removed.
    async fn delete(&self, id: Uuid) -> AppResult<DeleteOutcome>;

    async fn approver_of(&self, user: &User) -> AppResult<Option<ApproverSummary>>;

    fn backend(&self) -> &'static str;
}
