use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppResult;
use crate::users::model::{
    ApproverSummary, DecideOutcome, Decision, NewUser, ProfileUpdate, Role, SearchFilter, Status,
    User, UserRow, UserStats,
};
use crate::users::store::{DeleteOutcome, UserStore};

const USER_COLUMNS: &str = "id, first_name, last_name, email, password_hash, role, status, \
    phone, date_of_birth, profile_picture, last_login_at, approved_by, approved_at, \
    rejection_reason, created_at, updated_at";

/// Postgres-backed record store.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_users(rows: Vec<UserRow>) -> AppResult<Vec<User>> {
    rows.into_iter()
        .map(|r| User::try_from(r).map_err(Into::into))
        .collect()
}

fn into_user(row: Option<UserRow>) -> AppResult<Option<User>> {
    Ok(row.map(User::try_from).transpose()?)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> AppResult<User> {
        let id = Uuid::new_v4();
        // Records created already decided (seeded admins) are stamped as self-approved.
        let (approved_by, approved_at) = match user.status {
            Status::Pending => (None, None),
            _ => (Some(id), Some(OffsetDateTime::now_utc())),
        };
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, first_name, last_name, email, password_hash, role, status,
                               phone, date_of_birth, approved_by, approved_at)
            VALUES ($1, $2, $3, lower($4), $5, $6, $7, $8, $9, $10, $11)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(&user.phone)
        .bind(user.date_of_birth)
        .bind(approved_by)
        .bind(approved_at)
        .fetch_one(&self.db)
        .await?;
        Ok(User::try_from(row)?)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn list_by_status(&self, status: Status) -> AppResult<Vec<User>> {
        let order = match status {
            Status::Pending => "ASC",
            _ => "DESC",
        };
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE status = $1 AND role = 'USER'
            ORDER BY created_at {order}
            "#
        ))
        .bind(status.as_str())
        .fetch_all(&self.db)
        .await?;
        into_users(rows)
    }

    async fn search(&self, filter: &SearchFilter) -> AppResult<Vec<User>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users WHERE TRUE"));
        if let Some(q) = filter.query.as_deref().filter(|q| !q.is_empty()) {
            let pattern = format!("%{}%", q);
            qb.push(" AND (first_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR last_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR email ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(role) = filter.role {
            qb.push(" AND role = ").push_bind(role.as_str());
        }
        if let Some(from) = filter.created_from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.created_to {
            qb.push(" AND created_at <= ").push_bind(to);
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = qb
            .build_query_as::<UserRow>()
            .fetch_all(&self.db)
            .await
            .context("search users")?;
        into_users(rows)
    }

    async fn count_by_status(&self) -> AppResult<UserStats> {
        let (pending, approved, rejected, total) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING'),
                COUNT(*) FILTER (WHERE status = 'APPROVED'),
                COUNT(*) FILTER (WHERE status = 'REJECTED'),
                COUNT(*)
            FROM users
            WHERE role = 'USER'
            "#,
        )
        .fetch_one(&self.db)
        .await?;
        Ok(UserStats {
            pending,
            approved,
            rejected,
            total,
        })
    }

    async fn decide(
        &self,
        id: Uuid,
        admin_id: Uuid,
        decision: &Decision,
    ) -> AppResult<DecideOutcome> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET status = $3,
                   approved_by = $2,
                   approved_at = now(),
                   rejection_reason = $4,
                   updated_at = now()
             WHERE id = $1 AND status = 'PENDING'
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(admin_id)
        .bind(decision.target_status().as_str())
        .bind(decision.reason())
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = row {
            return Ok(DecideOutcome::Applied(User::try_from(row)?));
        }

        // Zero rows: tell a missing record apart from one already decided.
        let current = sqlx::query_scalar::<_, String>("SELECT status FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(match current {
            Some(s) => DecideOutcome::NotPending(s.parse()?),
            None => DecideOutcome::Missing,
        })
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET first_name = COALESCE($2, first_name),
                   last_name = COALESCE($3, last_name),
                   phone = COALESCE($4, phone),
                   date_of_birth = COALESCE($5, date_of_birth),
                   profile_picture = COALESCE($6, profile_picture),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.phone)
        .bind(update.date_of_birth)
        .bind(&update.profile_picture)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn record_login(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE users SET last_login_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> AppResult<DeleteOutcome> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1 AND role <> 'ADMIN'")
            .bind(id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() > 0 {
            return Ok(DeleteOutcome::Deleted);
        }

        let role = sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(match role.map(|r| r.parse::<Role>()).transpose()? {
            Some(Role::Admin) => DeleteOutcome::AdminProtected,
            // Raced with a concurrent delete.
            Some(Role::User) | None => DeleteOutcome::Missing,
        })
    }

    async fn approver_of(&self, user: &User) -> AppResult<Option<ApproverSummary>> {
        let Some(approver_id) = user.approved_by else {
            return Ok(None);
        };
        let approver = sqlx::query_as::<_, ApproverSummary>(
            "SELECT id, first_name, last_name, email FROM users WHERE id = $1",
        )
        .bind(approver_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(approver)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
