use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::users::model::{
    ApproverSummary, DecideOutcome, Decision, NewUser, ProfileUpdate, Role, SearchFilter, Status,
    User, UserStats,
};
use crate::users::store::{DeleteOutcome, UserStore};

/// Process-local record store. Each operation holds the write lock for its
/// whole check-and-update, which gives it the same atomicity as a single SQL
/// statement.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(user: &User, filter: &SearchFilter) -> bool {
    if let Some(q) = filter.query.as_deref().filter(|q| !q.is_empty()) {
        let q = q.to_lowercase();
        let hit = [&user.first_name, &user.last_name, &user.email]
            .iter()
            .any(|f| f.to_lowercase().contains(&q));
        if !hit {
            return false;
        }
    }
    filter.status.map_or(true, |s| user.status == s)
        && filter.role.map_or(true, |r| user.role == r)
        && filter.created_from.map_or(true, |from| user.created_at >= from)
        && filter.created_to.map_or(true, |to| user.created_at <= to)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser) -> AppResult<User> {
        let mut users = self.users.write().await;
        let email = new.email.to_lowercase();
        if users.values().any(|u| u.email.to_lowercase() == email) {
            return Err(AppError::Conflict(
                "User with this email already exists".into(),
            ));
        }

        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let (approved_by, approved_at) = match new.status {
            Status::Pending => (None, None),
            _ => (Some(id), Some(now)),
        };
        let user = User {
            id,
            first_name: new.first_name,
            last_name: new.last_name,
            email,
            password_hash: new.password_hash,
            role: new.role,
            status: new.status,
            phone: new.phone,
            date_of_birth: new.date_of_birth,
            profile_picture: None,
            last_login_at: None,
            approved_by,
            approved_at,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let email = email.to_lowercase();
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn list_by_status(&self, status: Status) -> AppResult<Vec<User>> {
        let mut list: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|u| u.status == status && u.role == Role::User)
            .cloned()
            .collect();
        list.sort_by_key(|u| u.created_at);
        if status != Status::Pending {
            list.reverse();
        }
        Ok(list)
    }

    async fn search(&self, filter: &SearchFilter) -> AppResult<Vec<User>> {
        let mut list: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|u| matches_filter(u, filter))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn count_by_status(&self) -> AppResult<UserStats> {
        let users = self.users.read().await;
        let mut stats = UserStats::default();
        for u in users.values().filter(|u| u.role == Role::User) {
            match u.status {
                Status::Pending => stats.pending += 1,
                Status::Approved => stats.approved += 1,
                Status::Rejected => stats.rejected += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }

    async fn decide(
        &self,
        id: Uuid,
        admin_id: Uuid,
        decision: &Decision,
    ) -> AppResult<DecideOutcome> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(DecideOutcome::Missing);
        };
        if user.status != Status::Pending {
            return Ok(DecideOutcome::NotPending(user.status));
        }

        let now = OffsetDateTime::now_utc();
        user.status = decision.target_status();
        user.approved_by = Some(admin_id);
        user.approved_at = Some(now);
        user.rejection_reason = decision.reason().map(str::to_owned);
        user.updated_at = now;
        Ok(DecideOutcome::Applied(user.clone()))
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> AppResult<Option<User>> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = &update.first_name {
            user.first_name = v.clone();
        }
        if let Some(v) = &update.last_name {
            user.last_name = v.clone();
        }
        if let Some(v) = &update.phone {
            user.phone = Some(v.clone());
        }
        if let Some(v) = update.date_of_birth {
            user.date_of_birth = Some(v);
        }
        if let Some(v) = &update.profile_picture {
            user.profile_picture = Some(v.clone());
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn record_login(&self, id: Uuid) -> AppResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.last_login_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> AppResult<DeleteOutcome> {
        let mut users = self.users.write().await;
        match users.get(&id).map(|u| u.role) {
            None => Ok(DeleteOutcome::Missing),
            Some(Role::Admin) => Ok(DeleteOutcome::AdminProtected),
            Some(Role::User) => {
                users.remove(&id);
                for u in users.values_mut() {
                    if u.approved_by == Some(id) {
                        u.approved_by = None;
                    }
                }
                Ok(DeleteOutcome::Deleted)
            }
        }
    }

    async fn approver_of(&self, user: &User) -> AppResult<Option<ApproverSummary>> {
        let Some(approver_id) = user.approved_by else {
            return Ok(None);
        };
        Ok(self
            .users
            .read()
            .await
            .get(&approver_id)
            .map(|a| ApproverSummary {
                id: a.id,
                first_name: a.first_name.clone(),
                last_name: a.last_name.clone(),
                email: a.email.clone(),
            }))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applicant(email: &str) -> NewUser {
        NewUser {
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            email: email.into(),
            password_hash: "hash".into(),
            phone: None,
            date_of_birth: None,
            role: Role::User,
            status: Status::Pending,
        }
    }

    #[tokio::test]
    async fn email_uniqueness_ignores_case() {
        let store = MemoryUserStore::new();
        store.create(applicant("grace@example.com")).await.unwrap();
        let err = store.create(applicant("GRACE@Example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let found = store.find_by_email("Grace@EXAMPLE.com").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn decide_only_moves_pending_records() {
        let store = MemoryUserStore::new();
        let user = store.create(applicant("a@example.com")).await.unwrap();
        let admin = Uuid::new_v4();

        let first = store.decide(user.id, admin, &Decision::Approve).await.unwrap();
        let DecideOutcome::Applied(updated) = first else {
            panic!("expected first decision to apply");
        };
        assert_eq!(updated.status, Status::Approved);
        assert_eq!(updated.approved_by, Some(admin));
        assert!(updated.approved_at.is_some());
        assert!(updated.rejection_reason.is_none());

        let second = store
            .decide(
                user.id,
                admin,
                &Decision::Reject {
                    reason: "late".into(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(second, DecideOutcome::NotPending(Status::Approved)));

        let missing = store
            .decide(Uuid::new_v4(), admin, &Decision::Approve)
            .await
            .unwrap();
        assert!(matches!(missing, DecideOutcome::Missing));
    }

    #[tokio::test]
    async fn admin_records_cannot_be_deleted() {
        let store = MemoryUserStore::new();
        let mut seed = applicant("root@example.com");
        seed.role = Role::Admin;
        seed.status = Status::Approved;
        let admin = store.create(seed).await.unwrap();
        assert_eq!(admin.approved_by, Some(admin.id));

        assert_eq!(
            store.delete(admin.id).await.unwrap(),
            DeleteOutcome::AdminProtected
        );
        assert!(store.find_by_id(admin.id).await.unwrap().is_some());

        let user = store.create(applicant("u@example.com")).await.unwrap();
        assert_eq!(store.delete(user.id).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete(user.id).await.unwrap(), DeleteOutcome::Missing);
    }

    #[tokio::test]
    async fn stats_and_search_ignore_admins_where_expected() {
        let store = MemoryUserStore::new();
        let mut seed = applicant("root@example.com");
        seed.role = Role::Admin;
        seed.status = Status::Approved;
        store.create(seed).await.unwrap();
        let a = store.create(applicant("a@example.com")).await.unwrap();
        store.create(applicant("b@example.com")).await.unwrap();
        store
            .decide(a.id, Uuid::new_v4(), &Decision::Approve)
            .await
            .unwrap();

        let stats = store.count_by_status().await.unwrap();
        assert_eq!(
            stats,
            UserStats {
                pending: 1,
                approved: 1,
                rejected: 0,
                total: 2
            }
        );

        let found = store
            .search(&SearchFilter {
                query: Some("B@EXAMPLE".into()),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let admins = store
            .search(&SearchFilter {
                role: Some(Role::Admin),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(admins.len(), 1);
    }
}
