pub mod broker;
pub mod handlers;
pub mod inline;
pub mod job;
pub mod processor;
pub mod queue;
pub mod sinks;

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::{BrokerMode, JobsConfig};
use broker::{stall_threshold, PgJobQueue, WorkerPool};
use inline::InlineJobQueue;
use processor::NotificationProcessor;
use queue::{JobHandler, JobQueue};
use sinks::{LogAuditSink, LogMailer};

pub fn default_handler() -> Arc<dyn JobHandler> {
    Arc::new(NotificationProcessor::new(
        Arc::new(LogMailer),
        Arc::new(LogAuditSink),
    ))
}

fn inline(handler: Arc<dyn JobHandler>) -> Arc<dyn JobQueue> {
    Arc::new(InlineJobQueue::new(handler))
}

/// Picks the pipeline once at startup. The broker is used only when it was
/// requested, a database is configured, and the `jobs` table answers a ping;
/// anything else selects the inline pipeline.
pub async fn start(
    cfg: &JobsConfig,
    db: Option<&PgPool>,
    handler: Arc<dyn JobHandler>,
) -> (Arc<dyn JobQueue>, Option<WorkerPool>) {
    match (cfg.broker, db) {
        (BrokerMode::Postgres, Some(db)) => {
            let broker = Arc::new(PgJobQueue::new(db.clone(), cfg.broker_timeout()));
            match broker.ping().await {
                Ok(()) => {
                    let stalled = stall_threshold(cfg.broker_timeout());
                    match broker.reclaim_stalled(stalled).await {
                        Ok(0) => {}
                        Ok(n) => info!(reclaimed = n, "requeued stalled jobs"),
                        Err(e) => warn!(error = %e, "could not requeue stalled jobs"),
                    }
                    let workers = broker.spawn_workers(handler, cfg.workers, cfg.poll_interval());
                    info!(workers = cfg.workers, "job pipeline: postgres broker");
                    (broker as Arc<dyn JobQueue>, Some(workers))
                }
                Err(e) => {
                    warn!(error = %e, "job broker unavailable, using inline job pipeline");
                    (inline(handler), None)
                }
            }
        }
        (BrokerMode::Postgres, None) => {
            warn!("no DATABASE_URL for the job broker, using inline job pipeline");
            (inline(handler), None)
        }
        (BrokerMode::Inline, _) => {
            info!("job pipeline: inline");
            (inline(handler), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn falls_back_to_inline_without_a_database() {
        let mut cfg = AppConfig::for_tests().jobs;
        cfg.broker = BrokerMode::Postgres;
        let (queue, workers) = start(&cfg, None, default_handler()).await;
        assert_eq!(queue.mode(), "inline");
        assert!(workers.is_none());
    }
}
