//! Registry of jobs currently running, for status reporting.
//!
//! Writers build a new list and swap it in; readers clone the `Arc` and
//! never see a list being modified.

use crate::jobs::{Job, JobType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// A job a worker is executing right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJob {
    pub job_id: String,
    pub job_type: JobType,
    pub resource_id: i64,
    pub part_index: Option<u32>,
    pub audio_file_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ActiveJobs {
    current: Mutex<Arc<Vec<ActiveJob>>>,
}

impl ActiveJobs {
    /// Record `job` as running until the returned guard is dropped.
    pub fn begin(&self, job: &Job) -> ActiveGuard<'_> {
        let entry = ActiveJob {
            job_id: job.job_id.clone().unwrap_or_default(),
            job_type: job.job_type(),
            resource_id: job.resource_id(),
            part_index: job.part_index(),
            audio_file_path: job.audio_file_path().cloned(),
            started_at: Utc::now(),
        };
        let started_at = entry.started_at;
        let job_id = entry.job_id.clone();

        let mut current = self.lock();
        let mut next = current.as_ref().clone();
        next.push(entry);
        *current = Arc::new(next);

        ActiveGuard {
            registry: self,
            job_id,
            started_at,
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<ActiveJob>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn finish(&self, job_id: &str, started_at: DateTime<Utc>) {
        let mut current = self.lock();
        let mut next = current.as_ref().clone();
        // Jobs without an id share the empty string; match the start time
        // too so only this worker's entry goes.
        if let Some(pos) = next
            .iter()
            .position(|j| j.job_id == job_id && j.started_at == started_at)
        {
            next.remove(pos);
        }
        *current = Arc::new(next);
    }

    // A poisoned lock still holds a whole list: it is only ever replaced.
    fn lock(&self) -> MutexGuard<'_, Arc<Vec<ActiveJob>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Removes its job from the registry when dropped.
pub struct ActiveGuard<'a> {
    registry: &'a ActiveJobs,
    job_id: String,
    started_at: DateTime<Utc>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.registry.finish(&self.job_id, self.started_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, episode: i64) -> Job {
        let mut job = Job::transcribe(episode, 1, Some(PathBuf::from("/a/part1.mp3")));
        job.job_id = Some(id.to_string());
        job
    }

    #[test]
    fn test_guard_tracks_lifetime() {
        let active = ActiveJobs::default();
        assert!(active.is_empty());

        let first = active.begin(&job("a", 1));
        let second = active.begin(&job("b", 2));
        assert_eq!(active.len(), 2);

        drop(first);
        let remaining = active.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].job_id, "b");
        assert_eq!(remaining[0].job_type, JobType::Transcribe);
        assert_eq!(remaining[0].part_index, Some(1));

        drop(second);
        assert!(active.is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_while_registry_changes() {
        let active = ActiveJobs::default();
        let _running = active.begin(&job("a", 1));

        let before = active.snapshot();
        let later = active.begin(&job("b", 2));
        assert_eq!(before.len(), 1);
        assert_eq!(active.snapshot().len(), 2);
        drop(later);
    }
}
