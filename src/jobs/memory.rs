//! In-process job queue.

use super::{Job, JobQueue, QueueSnapshot};
use crate::error::{HarkError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Job queue held in memory. Items are kept in their serialized form so the
/// same parse-and-skip rules apply as for the durable queue.
pub struct MemoryJobQueue {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Append an already-serialized item.
    pub fn push_raw(&self, raw: impl Into<String>) -> Result<()> {
        self.lock()?.push_back(raw.into());
        self.notify.notify_one();
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<String>>> {
        self.items
            .lock()
            .map_err(|e| HarkError::Queue(format!("Failed to acquire lock: {}", e)))
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, mut job: Job) -> Result<String> {
        let id = job.ensure_id();
        self.push_raw(job.to_json()?)?;
        debug!("Enqueued {} for {} ({})", job.job_type(), job.resource_id(), id);
        Ok(id)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>> {
        let deadline = Instant::now() + timeout;

        loop {
            let raw = self.lock()?.pop_front();
            match raw {
                Some(raw) => match Job::from_json(&raw) {
                    Ok(job) => return Ok(Some(job)),
                    Err(e) => {
                        warn!("Dropping unreadable queue item: {}", e);
                        continue;
                    }
                },
                None => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
                }
            }
        }
    }

    async fn snapshot(&self, limit: usize) -> Result<QueueSnapshot> {
        let items = self.lock()?;
        let jobs = items
            .iter()
            .filter_map(|raw| Job::from_json(raw).ok())
            .take(limit)
            .collect();

        Ok(QueueSnapshot {
            total_size: items.len(),
            jobs,
        })
    }
}
