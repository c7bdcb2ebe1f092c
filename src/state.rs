use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::config::AppConfig;
use crate::jobs::{self, broker::WorkerPool, inline::InlineJobQueue, queue::JobQueue};
use crate::users::{
    memory::MemoryUserStore, repo::PgUserStore, store::UserStore, workflow::ApprovalWorkflow,
};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Builds the process-wide context. The returned worker pool, if any, must
    /// be shut down by the caller once the server stops.
    pub async fn init() -> anyhow::Result<(Self, Option<WorkerPool>)> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(Duration::from_secs(config.jobs.broker_timeout_secs))
                    .connect(url)
                    .await
                    .context("connect to postgres")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                Some(db)
            }
            None => None,
        };

        let users: Arc<dyn UserStore> = match &db {
            Some(db) => Arc::new(PgUserStore::new(db.clone())),
            None => Arc::new(MemoryUserStore::new()),
        };
        info!(backend = users.backend(), "record store ready");

        let (jobs, workers) =
            jobs::start(&config.jobs, db.as_ref(), jobs::default_handler()).await;

        let state = Self::from_parts(users, jobs, config);
        if let Some(seed) = &state.config.admin {
            crate::auth::services::ensure_admin(&state, seed).await?;
        }
        Ok((state, workers))
    }

    pub fn from_parts(
        users: Arc<dyn UserStore>,
        jobs: Arc<dyn JobQueue>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            users,
            jobs,
            config,
        }
    }

    /// In-memory store, inline pipeline, test configuration.
    pub fn fake() -> Self {
        Self::from_parts(
            Arc::new(MemoryUserStore::new()),
            Arc::new(InlineJobQueue::new(jobs::default_handler())),
            Arc::new(AppConfig::for_tests()),
        )
    }

    pub fn workflow(&self) -> ApprovalWorkflow {
        ApprovalWorkflow::new(self.users.clone(), self.jobs.clone())
    }
}
