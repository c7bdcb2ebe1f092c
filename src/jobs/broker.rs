//! Postgres-backed job broker.
//!
//! The `jobs` table is the durable queue. Workers claim rows with
//! `FOR UPDATE SKIP LOCKED`, so any number of workers (in this process or
//! others) can poll the same table without double-processing a job.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use futures::FutureExt;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::jobs::job::{Job, JobHandle, JobKind, RetryPolicy};
use crate::jobs::queue::{JobHandler, JobQueue, KindCounts, QueueStats};

/// What a failed attempt turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    Retry { delay: Duration },
    Fail,
}

fn settle_failure(policy: RetryPolicy, attempt: u32) -> Settle {
    if policy.should_retry(attempt) {
        Settle::Retry {
            delay: policy.delay_after(attempt),
        }
    } else {
        Settle::Fail
    }
}

/// Folds `(kind, status, count)` rows into per-kind counters. Every known
/// kind is present; unknown kinds and statuses are skipped.
fn tally(mode: &'static str, rows: Vec<(String, String, i64)>) -> QueueStats {
    let mut stats = QueueStats::empty(mode);
    for kind in JobKind::ALL {
        stats.queues.insert(kind.stats_key(), KindCounts::default());
    }
    for (kind, status, count) in rows {
        let Ok(kind) = kind.parse::<JobKind>() else {
            continue;
        };
        let Some(counts) = stats.queues.get_mut(kind.stats_key()) else {
            continue;
        };
        match status.as_str() {
            "waiting" => counts.waiting = count,
            "active" => counts.active = count,
            "completed" => counts.completed = count,
            "failed" => counts.failed = count,
            _ => {}
        }
    }
    stats
}

/// A job still `active` after this long has lost its worker. Handler runs are
/// cut off at `timeout`, so twice that leaves room for the outcome write.
pub fn stall_threshold(timeout: Duration) -> Duration {
    timeout * 2
}

fn reclaim_due(since_last: Duration, timeout: Duration) -> bool {
    since_last >= stall_threshold(timeout)
}

#[derive(Clone)]
pub struct PgJobQueue {
    db: PgPool,
    timeout: Duration,
}

type ClaimedRow = (Uuid, String, serde_json::Value, i32);

impl PgJobQueue {
    /// `timeout` bounds every broker round-trip and every handler run.
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    /// Checks the broker is reachable and its table exists.
    pub async fn ping(&self) -> anyhow::Result<()> {
        tokio::time::timeout(
            self.timeout,
            sqlx::query("SELECT 1 FROM jobs LIMIT 1").execute(&self.db),
        )
        .await
        .context("broker ping timed out")?
        .context("broker ping")?;
        Ok(())
    }

    async fn claim_next(&self, worker_id: &str) -> anyhow::Result<Option<Job>> {
        let row = sqlx::query_as::<_, ClaimedRow>(
            r#"
            WITH next AS (
                SELECT id
                  FROM jobs
                 WHERE status = 'waiting'
                   AND run_at <= now()
                 ORDER BY run_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
               SET status = 'active',
                   worker_id = $1,
                   updated_at = now()
             WHERE id IN (SELECT id FROM next)
            RETURNING id, kind, payload, attempt
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.db)
        .await
        .context("claim job")?;

        let Some((id, kind, payload, attempt)) = row else {
            return Ok(None);
        };
        Ok(Some(Job {
            id,
            kind: kind.parse()?,
            payload,
            attempt: attempt.max(1) as u32,
        }))
    }

    async fn mark_completed(&self, job: &Job) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', last_error = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(job.id)
        .execute(&self.db)
        .await
        .context("mark job completed")?;
        Ok(())
    }

    /// Reschedules with backoff while attempts remain, otherwise marks the job failed.
    async fn mark_failed(&self, job: &Job, reason: &str) -> anyhow::Result<()> {
        match settle_failure(job.kind.retry_policy(), job.attempt) {
            Settle::Retry { delay } => self.reschedule(job, reason, delay).await,
            Settle::Fail => {
                sqlx::query(
                    "UPDATE jobs SET status = 'failed', last_error = $2, updated_at = now() WHERE id = $1",
                )
                .bind(job.id)
                .bind(reason)
                .execute(&self.db)
                .await
                .context("mark job failed")?;
                error!(job_id = %job.id, kind = %job.kind, attempt = job.attempt, error = reason, "job failed permanently");
                Ok(())
            }
        }
    }

    async fn reschedule(&self, job: &Job, reason: &str, delay: Duration) -> anyhow::Result<()> {
        let run_at = OffsetDateTime::now_utc() + delay;
        sqlx::query(
            r#"
            UPDATE jobs
               SET status = 'waiting',
                   attempt = attempt + 1,
                   run_at = $2,
                   worker_id = NULL,
                   last_error = $3,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(run_at)
        .bind(reason)
        .execute(&self.db)
        .await
        .context("reschedule job")?;
        warn!(job_id = %job.id, kind = %job.kind, attempt = job.attempt, ?delay, error = reason, "job failed; retry scheduled");
        Ok(())
    }

    /// Returns jobs left `active` by a worker that died back to `waiting`.
    pub async fn reclaim_stalled(&self, older_than: Duration) -> anyhow::Result<u64> {
        let cutoff = OffsetDateTime::now_utc() - older_than;
        let res = sqlx::query(
            r#"
            UPDATE jobs
               SET status = 'waiting',
                   worker_id = NULL,
                   updated_at = now()
             WHERE status = 'active' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.db)
        .await
        .context("reclaim stalled jobs")?;
        Ok(res.rows_affected())
    }

    async fn run_one(&self, job: Job, handler: &dyn JobHandler) {
        debug!(job_id = %job.id, kind = %job.kind, attempt = job.attempt, "job started");
        let outcome = tokio::time::timeout(
            self.timeout,
            AssertUnwindSafe(handler.handle(&job, self)).catch_unwind(),
        )
        .await;

        let result = match outcome {
            Ok(Ok(Ok(()))) => self.mark_completed(&job).await,
            Ok(Ok(Err(e))) => self.mark_failed(&job, &format!("{e:#}")).await,
            Ok(Err(_)) => self.mark_failed(&job, "handler panicked").await,
            Err(_) => self.mark_failed(&job, "handler timed out").await,
        };
        match result {
            Ok(()) => debug!(job_id = %job.id, kind = %job.kind, "job settled"),
            Err(e) => error!(
                job_id = %job.id,
                error = %e,
                "could not record job outcome; left for the stall sweep"
            ),
        }
    }

    async fn work(
        self: Arc<Self>,
        worker_id: String,
        handler: Arc<dyn JobHandler>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(%worker_id, "job worker started");
        let mut last_sweep = tokio::time::Instant::now();
        while !*shutdown.borrow() {
            if reclaim_due(last_sweep.elapsed(), self.timeout) {
                last_sweep = tokio::time::Instant::now();
                match self.reclaim_stalled(stall_threshold(self.timeout)).await {
                    Ok(0) => {}
                    Ok(n) => warn!(%worker_id, reclaimed = n, "stalled jobs returned to waiting"),
                    Err(e) => warn!(%worker_id, error = %e, "stall sweep failed"),
                }
            }
            match self.claim_next(&worker_id).await {
                Ok(Some(job)) => self.run_one(job, handler.as_ref()).await,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    warn!(%worker_id, error = %e, "claiming job failed");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
        info!(%worker_id, "job worker stopped");
    }

    /// Starts `count` workers polling the queue until the returned pool is shut down.
    pub fn spawn_workers(
        self: &Arc<Self>,
        handler: Arc<dyn JobHandler>,
        count: usize,
        poll_interval: Duration,
    ) -> WorkerPool {
        let (tx, rx) = watch::channel(false);
        let handles = (0..count.max(1))
            .map(|n| {
                let worker_id = format!("worker-{}-{}", std::process::id(), n);
                tokio::spawn(Arc::clone(self).work(
                    worker_id,
                    handler.clone(),
                    poll_interval,
                    rx.clone(),
                ))
            })
            .collect();
        WorkerPool {
            shutdown: tx,
            handles,
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue_with_id(
        &self,
        id: Uuid,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> anyhow::Result<JobHandle> {
        let policy = kind.retry_policy();
        let res = tokio::time::timeout(
            self.timeout,
            sqlx::query(
                r#"
                INSERT INTO jobs (id, kind, payload, max_attempts)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(kind.as_str())
            .bind(&payload)
            .bind(policy.max_attempts as i32)
            .execute(&self.db),
        )
        .await
        .context("enqueue timed out")?
        .context("enqueue job")?;

        if res.rows_affected() == 0 {
            debug!(job_id = %id, %kind, "job already enqueued");
        } else {
            debug!(job_id = %id, %kind, "job enqueued");
        }
        Ok(JobHandle { id, kind })
    }

    async fn stats(&self) -> anyhow::Result<QueueStats> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT kind, status, COUNT(*) FROM jobs GROUP BY kind, status",
        )
        .fetch_all(&self.db)
        .await
        .context("queue stats")?;

        Ok(tally(self.mode(), rows))
    }

    fn mode(&self) -> &'static str {
        "postgres"
    }
}

/// Running broker workers.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Signals every worker and waits for in-flight jobs to settle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for h in self.handles {
            if let Err(e) = h.await {
                error!(error = %e, "job worker exited abnormally");
            }
        }
    }
}
