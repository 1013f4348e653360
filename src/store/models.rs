//! Persisted entities.

use crate::pipeline::ProcessingStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// A subscribed RSS feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Podcast {
    pub id: i64,
    pub feed_url: String,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Episodes published before this date are recorded but not downloaded.
    pub download_until: Option<NaiveDate>,
}

/// Fields for registering a podcast.
#[derive(Debug, Clone, Default)]
pub struct NewPodcast {
    pub feed_url: String,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub download_until: Option<NaiveDate>,
}

/// One feed entry with an audio enclosure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: i64,
    pub podcast_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub guid: Option<String>,
    pub content_hash: String,
    pub audio_url: String,
    pub audio_file_path: Option<PathBuf>,
    pub published_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u32>,
    /// Number of audio parts the transcript is assembled from. Stamped when
    /// the audio is downloaded.
    pub expected_parts: Option<u32>,
    pub status: ProcessingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    /// Expected part count; unknown counts as a single part.
    pub fn part_count(&self) -> u32 {
        self.expected_parts.unwrap_or(1).max(1)
    }

    pub fn is_split(&self) -> bool {
        self.part_count() > 1
    }
}

/// Fields for inserting a newly discovered episode.
#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub podcast_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub guid: Option<String>,
    pub content_hash: String,
    pub audio_url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Hash identifying an episode that has no GUID.
pub fn content_hash(title: &str, audio_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(audio_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// A transcribed span on the episode timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub episode_id: i64,
    pub part_index: u32,
    pub segment_index: u32,
    /// Milliseconds from the start of the episode, not of the part.
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    pub speaker_label: Option<String>,
}

/// A group of consecutive segments with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingChunk {
    pub episode_id: i64,
    pub chunk_index: u32,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    /// Distinct speaker labels in first-appearance order, joined by ", ".
    pub speaker_labels: Option<String>,
    pub embedding: Vec<f32>,
}

/// A search hit joined with its episode.
#[derive(Debug, Clone)]
pub struct ChunkMatch {
    pub chunk: EmbeddingChunk,
    pub episode_title: String,
    pub audio_url: String,
    /// Cosine distance to the query (lower is closer).
    pub distance: f32,
}
