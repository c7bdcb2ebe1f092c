use std::{panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info};
use uuid::Uuid;

use crate::jobs::job::{Job, JobHandle, JobKind};
use crate::jobs::queue::{JobHandler, JobQueue, QueueStats};

/// Degraded pipeline used when no broker is available.
///
/// Jobs run to completion inside `enqueue`. A failing or panicking handler is
/// logged and the job is dropped: there is no retry in this mode.
pub struct InlineJobQueue {
    handler: Arc<dyn JobHandler>,
}

impl InlineJobQueue {
    pub fn new(handler: Arc<dyn JobHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl JobQueue for InlineJobQueue {
    async fn enqueue_with_id(
        &self,
        id: Uuid,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> anyhow::Result<JobHandle> {
        let job = Job::with_id(id, kind, payload);
        let handle = JobHandle { id: job.id, kind };
        info!(job_id = %job.id, %kind, "inline job started");

        match AssertUnwindSafe(self.handler.handle(&job, self))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => info!(job_id = %job.id, %kind, "inline job completed"),
            Ok(Err(e)) => error!(job_id = %job.id, %kind, error = %e, "inline job failed; dropped"),
            Err(_) => error!(job_id = %job.id, %kind, "inline job panicked; dropped"),
        }

        Ok(handle)
    }

    async fn stats(&self) -> anyhow::Result<QueueStats> {
        Ok(QueueStats::empty(self.mode()))
    }

    fn mode(&self) -> &'static str {
        "inline"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Failing;

    #[async_trait]
    impl JobHandler for Failing {
        async fn handle(&self, _job: &Job, _queue: &dyn JobQueue) -> anyhow::Result<()> {
            anyhow::bail!("smtp relay refused connection")
        }
    }

    struct Panicking;

    #[async_trait]
    impl JobHandler for Panicking {
        async fn handle(&self, _job: &Job, _queue: &dyn JobQueue) -> anyhow::Result<()> {
            panic!("handler bug")
        }
    }

    /// Counts calls and fans each approval notification out into one email.
    #[derive(Default)]
    struct Chain {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for Chain {
        async fn handle(&self, job: &Job, queue: &dyn JobQueue) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if job.kind == JobKind::ApprovalNotification {
                queue.enqueue(JobKind::Email, serde_json::json!({})).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_error_is_swallowed() {
        let queue = InlineJobQueue::new(Arc::new(Failing));
        let handle = queue
            .enqueue(JobKind::Email, serde_json::json!({"to": "x@example.com"}))
            .await
            .expect("enqueue must not surface handler errors");
        assert_eq!(handle.kind, JobKind::Email);
    }

    #[tokio::test]
    async fn handler_panic_does_not_escape() {
        let queue = InlineJobQueue::new(Arc::new(Panicking));
        let res = queue.enqueue(JobKind::AuditLog, serde_json::json!({})).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn follow_on_jobs_run_inline() {
        let chain = Arc::new(Chain::default());
        let queue = InlineJobQueue::new(chain.clone());
        queue
            .enqueue(JobKind::ApprovalNotification, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(chain.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stats_are_empty() {
        let queue = InlineJobQueue::new(Arc::new(Failing));
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.mode, "inline");
        assert!(stats.queues.is_empty());
    }
}
