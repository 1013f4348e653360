//! Worker pool: N identical loops pulling jobs off the queue and running
//! them through the pipeline.
//!
//! A job is taken off the queue before it runs and is never put back, so
//! a failure or crash loses it. The reconciler picks up the pieces.

mod active;

pub use active::{ActiveJob, ActiveJobs};

use crate::config::JobSettings;
use crate::error::Result;
use crate::jobs::{Job, JobQueue};
use crate::pipeline::{Pipeline, StageOutcome};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Point-in-time view of the pool for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub parallelism: usize,
    pub active_job_count: usize,
    pub queue_size: usize,
    pub queued_jobs: Vec<Job>,
    pub active_jobs: Vec<ActiveJob>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone)]
pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    queue: Arc<dyn JobQueue>,
    active: Arc<ActiveJobs>,
    settings: JobSettings,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, queue: Arc<dyn JobQueue>, settings: JobSettings) -> Self {
        Self {
            pipeline,
            queue,
            active: Arc::new(ActiveJobs::default()),
            settings,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.settings.parallelism.max(1)
    }

    /// Spawn the worker loops. They run until `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> WorkerHandle {
        info!("Starting {} workers", self.parallelism());
        let handles = (0..self.parallelism())
            .map(|worker| {
                let pool = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(
                    async move { pool.work(cancel).await }
                        .instrument(tracing::info_span!("worker", id = worker)),
                )
            })
            .collect();

        WorkerHandle {
            cancel,
            handles,
            grace: self.settings.shutdown_grace(),
        }
    }

    async fn work(&self, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.queue.dequeue(self.settings.dequeue_timeout()) => next,
            };

            let idle = match next {
                Ok(Some(job)) => {
                    self.run_job(job).await;
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!("Dequeue failed: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.poll_delay()) => {}
                }
            }
        }
        debug!("Worker stopped");
    }

    /// Run one job to completion and log how it ended.
    pub async fn run_job(&self, job: Job) {
        let _active = self.active.begin(&job);
        let label = format!(
            "{} {}{}",
            job.job_type(),
            job.resource_id(),
            job.part_index().map(|p| format!(" part {}", p)).unwrap_or_default()
        );
        info!("Running {}", label);

        match AssertUnwindSafe(self.pipeline.handle(&job)).catch_unwind().await {
            Ok(Ok(StageOutcome::Completed)) => info!("Finished {}", label),
            Ok(Ok(StageOutcome::Skipped(reason))) => info!("Skipped {}: {}", label, reason),
            Ok(Ok(StageOutcome::Failed(reason))) => error!("Failed {}: {}", label, reason),
            Ok(Err(e)) => error!("Dropped {}: {}", label, e),
            Err(_) => error!("{} panicked", label),
        }
    }

    pub fn active_jobs(&self) -> Vec<ActiveJob> {
        self.active.snapshot().as_ref().clone()
    }

    /// Pure read of pool and queue state.
    pub async fn status(&self, limit: usize) -> Result<WorkerStatus> {
        let snapshot = self.queue.snapshot(limit).await?;
        let active = self.active_jobs();
        Ok(WorkerStatus {
            parallelism: self.parallelism(),
            active_job_count: active.len(),
            queue_size: snapshot.total_size,
            queued_jobs: snapshot.jobs,
            active_jobs: active,
            last_updated: Utc::now(),
        })
    }
}

/// Running workers. Dropping it leaves them running; call
/// [`WorkerHandle::shutdown`] to stop them.
pub struct WorkerHandle {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl WorkerHandle {
    /// Stop dequeuing, give running jobs the grace period, then abort
    /// whatever is still going.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + self.grace;

        for mut handle in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Worker exited abnormally: {}", e),
                Err(_) => {
                    warn!("Worker still busy after {:?}, aborting", self.grace);
                    handle.abort();
                }
            }
        }
        info!("Workers stopped");
    }
}
