//! Durable job queue.
//!
//! Jobs are small tagged records naming a pipeline stage and the resource it
//! acts on. They are stored as JSON in a flat camelCase shape:
//!
//! ```json
//! {"type":"TRANSCRIBE","resourceId":42,"partIndex":1,"audioFilePath":"/a/episode_42_part1.mp3","jobId":"..."}
//! ```
//!
//! The queue is strictly FIFO and does no redelivery of its own: a dequeued
//! job is gone, and a job that fails is never put back. Delivery is
//! at-least-once only together with the reconciliation loop, which requeues
//! work for episodes left mid-stage.

mod memory;
mod sqlite;

pub use memory::MemoryJobQueue;
pub use sqlite::SqliteJobQueue;

use crate::error::{HarkError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Job discriminator as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    SyncEpisodes,
    DownloadAudio,
    Transcribe,
    IndexEpisode,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::SyncEpisodes => "SYNC_EPISODES",
            JobType::DownloadAudio => "DOWNLOAD_AUDIO",
            JobType::Transcribe => "TRANSCRIBE",
            JobType::IndexEpisode => "INDEX_EPISODE",
        };
        f.write_str(s)
    }
}

/// What a job asks the pipeline to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    SyncEpisodes { podcast_id: i64 },
    DownloadAudio { episode_id: i64 },
    Transcribe {
        episode_id: i64,
        part_index: u32,
        audio_file_path: Option<PathBuf>,
    },
    IndexEpisode { episode_id: i64 },
}

impl JobKind {
    pub fn job_type(&self) -> JobType {
        match self {
            JobKind::SyncEpisodes { .. } => JobType::SyncEpisodes,
            JobKind::DownloadAudio { .. } => JobType::DownloadAudio,
            JobKind::Transcribe { .. } => JobType::Transcribe,
            JobKind::IndexEpisode { .. } => JobType::IndexEpisode,
        }
    }

    /// Podcast id for feed syncs, episode id for everything else.
    pub fn resource_id(&self) -> i64 {
        match self {
            JobKind::SyncEpisodes { podcast_id } => *podcast_id,
            JobKind::DownloadAudio { episode_id }
            | JobKind::Transcribe { episode_id, .. }
            | JobKind::IndexEpisode { episode_id } => *episode_id,
        }
    }
}

/// A unit of queued work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JobRecord", into = "JobRecord")]
pub struct Job {
    /// Assigned at enqueue time when absent.
    pub job_id: Option<String>,
    pub kind: JobKind,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        Self { job_id: None, kind }
    }

    pub fn sync_episodes(podcast_id: i64) -> Self {
        Self::new(JobKind::SyncEpisodes { podcast_id })
    }

    pub fn download_audio(episode_id: i64) -> Self {
        Self::new(JobKind::DownloadAudio { episode_id })
    }

    pub fn transcribe(episode_id: i64, part_index: u32, audio_file_path: Option<PathBuf>) -> Self {
        Self::new(JobKind::Transcribe {
            episode_id,
            part_index,
            audio_file_path,
        })
    }

    pub fn index_episode(episode_id: i64) -> Self {
        Self::new(JobKind::IndexEpisode { episode_id })
    }

    pub fn job_type(&self) -> JobType {
        self.kind.job_type()
    }

    pub fn resource_id(&self) -> i64 {
        self.kind.resource_id()
    }

    pub fn part_index(&self) -> Option<u32> {
        match &self.kind {
            JobKind::Transcribe { part_index, .. } => Some(*part_index),
            _ => None,
        }
    }

    pub fn audio_file_path(&self) -> Option<&PathBuf> {
        match &self.kind {
            JobKind::Transcribe { audio_file_path, .. } => audio_file_path.as_ref(),
            _ => None,
        }
    }

    /// Fill in a job id if the caller did not provide one.
    pub(crate) fn ensure_id(&mut self) -> String {
        self.job_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone()
    }

    /// Serialize to the queue's wire format.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a queue item.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| HarkError::Queue(format!("Malformed job {:?}: {}", raw, e)))
    }
}

/// Flat wire representation of a [`Job`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobRecord {
    #[serde(rename = "type")]
    job_type: JobType,
    resource_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    part_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
}

impl TryFrom<JobRecord> for Job {
    type Error = String;

    fn try_from(record: JobRecord) -> std::result::Result<Self, Self::Error> {
        let id = record
            .resource_id
            .ok_or_else(|| format!("{} job without resourceId", record.job_type))?;

        let kind = match record.job_type {
            JobType::SyncEpisodes => JobKind::SyncEpisodes { podcast_id: id },
            JobType::DownloadAudio => JobKind::DownloadAudio { episode_id: id },
            JobType::Transcribe => JobKind::Transcribe {
                episode_id: id,
                part_index: record.part_index.unwrap_or(0),
                audio_file_path: record.audio_file_path.map(PathBuf::from),
            },
            JobType::IndexEpisode => JobKind::IndexEpisode { episode_id: id },
        };

        Ok(Job {
            job_id: record.job_id,
            kind,
        })
    }
}

impl From<Job> for JobRecord {
    fn from(job: Job) -> Self {
        let job_type = job.job_type();
        let resource_id = Some(job.resource_id());
        let (part_index, audio_file_path) = match job.kind {
            JobKind::Transcribe {
                part_index,
                audio_file_path,
                ..
            } => (
                Some(part_index),
                audio_file_path.map(|p| p.to_string_lossy().into_owned()),
            ),
            _ => (None, None),
        };

        JobRecord {
            job_type,
            resource_id,
            part_index,
            audio_file_path,
            job_id: job.job_id,
        }
    }
}

/// A read-only look at the head of the queue.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// Total number of items in the queue, malformed ones included.
    pub total_size: usize,
    /// Up to `limit` parseable jobs, oldest first.
    pub jobs: Vec<Job>,
}

/// Trait for job queue backends.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to the tail. Returns its job id.
    async fn enqueue(&self, job: Job) -> Result<String>;

    /// Pop the head, waiting up to `timeout` for one to arrive.
    ///
    /// Items that fail to parse are logged and dropped; the wait continues
    /// with the next item.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>>;

    /// Peek at up to `limit` jobs without removing them.
    async fn snapshot(&self, limit: usize) -> Result<QueueSnapshot>;

    /// Number of queued items.
    async fn size(&self) -> Result<usize> {
        Ok(self.snapshot(0).await?.total_size)
    }
}

/// How often a blocked dequeue re-checks storage written by other processes.
pub(crate) const POLL_SLICE: Duration = Duration::from_millis(250);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let mut job = Job::transcribe(42, 1, Some(PathBuf::from("/audio/episode_42_part1.mp3")));
        job.job_id = Some("abc".to_string());

        let value: serde_json::Value = serde_json::from_str(&job.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "TRANSCRIBE");
        assert_eq!(value["resourceId"], 42);
        assert_eq!(value["partIndex"], 1);
        assert_eq!(value["audioFilePath"], "/audio/episode_42_part1.mp3");
        assert_eq!(value["jobId"], "abc");

        assert_eq!(Job::from_json(&job.to_json().unwrap()).unwrap(), job);
    }

    #[test]
    fn test_tolerates_missing_optional_fields() {
        let job = Job::from_json(r#"{"type":"TRANSCRIBE","resourceId":7}"#).unwrap();
        assert_eq!(
            job.kind,
            JobKind::Transcribe {
                episode_id: 7,
                part_index: 0,
                audio_file_path: None
            }
        );
        assert!(job.job_id.is_none());

        let job = Job::from_json(r#"{"type":"INDEX_EPISODE","resourceId":3,"partIndex":null}"#).unwrap();
        assert_eq!(job.kind, JobKind::IndexEpisode { episode_id: 3 });
    }

    #[test]
    fn test_non_transcribe_jobs_omit_part_fields() {
        let raw = Job::sync_episodes(5).to_json().unwrap();
        assert_eq!(raw, r#"{"type":"SYNC_EPISODES","resourceId":5}"#);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(Job::from_json("not json").is_err());
        assert!(Job::from_json(r#"{"type":"EXPLODE","resourceId":1}"#).is_err());
        assert!(Job::from_json(r#"{"type":"DOWNLOAD_AUDIO"}"#).is_err());
    }

    #[test]
    fn test_ensure_id_keeps_existing() {
        let mut job = Job::index_episode(1);
        let id = job.ensure_id();
        assert_eq!(job.ensure_id(), id);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
