use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::jobs::job::{Job, JobHandle, JobKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub mode: &'static str,
    pub queues: BTreeMap<&'static str, KindCounts>,
}

impl QueueStats {
    /// Stats for a pipeline that keeps no job bookkeeping.
    pub fn empty(mode: &'static str) -> Self {
        Self {
            mode,
            queues: BTreeMap::new(),
        }
    }
}

/// Capability shared by the broker-backed and inline pipelines.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues under a caller-chosen id. Enqueueing an id that already exists
    /// is a no-op that returns the same handle.
    async fn enqueue_with_id(
        &self,
        id: Uuid,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> anyhow::Result<JobHandle>;

    async fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> anyhow::Result<JobHandle> {
        self.enqueue_with_id(Uuid::new_v4(), kind, payload).await
    }

    async fn stats(&self) -> anyhow::Result<QueueStats>;

    fn mode(&self) -> &'static str;
}

impl dyn JobQueue + '_ {
    pub async fn enqueue_json<T: Serialize + Sync>(
        &self,
        kind: JobKind,
        payload: &T,
    ) -> anyhow::Result<JobHandle> {
        self.enqueue(kind, serde_json::to_value(payload)?).await
    }
}

/// Processes one job. `queue` is the pipeline the job came from, used for follow-on jobs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, queue: &dyn JobQueue) -> anyhow::Result<()>;
}
