//! The ingest pipeline: one stage per job type, driven by the worker pool.
//!
//! ```text
//! SyncEpisodes -> DownloadAudio -> Transcribe (per part) -> IndexEpisode
//! ```
//!
//! Each stage re-reads the episode, checks its guard and claims the episode
//! with a status compare-and-set before doing any work. A job that loses
//! the claim is reported as skipped, so duplicate deliveries are harmless.

mod audio;
mod feed;
mod index;
mod reconcile;
pub mod status;
mod transcribe;

pub use audio::AudioStage;
pub use feed::{FeedSync, SyncReport};
pub use index::{build_chunks, ChunkDraft, IndexingStage, SEGMENTS_PER_CHUNK};
pub use reconcile::{ReconcileReport, Reconciler};
pub use status::ProcessingStatus;
pub use transcribe::{place_segments, time_offset_ms, TranscriptionStage};

use crate::error::Result;
use crate::jobs::{Job, JobKind};

/// How a stage left the job it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    /// Nothing to do: the guard held or another worker owns the episode.
    Skipped(String),
    /// The stage failed and recorded it on the episode.
    Failed(String),
}

impl StageOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StageOutcome::Skipped(reason.into())
    }
}

/// Routes jobs to their stage.
pub struct Pipeline {
    pub feed: FeedSync,
    pub audio: AudioStage,
    pub transcription: TranscriptionStage,
    pub indexing: IndexingStage,
}

impl Pipeline {
    /// Run one job. `Err` means the job could not be processed at all (for
    /// example, its episode is gone); stage failures come back as
    /// [`StageOutcome::Failed`].
    pub async fn handle(&self, job: &Job) -> Result<StageOutcome> {
        match &job.kind {
            JobKind::SyncEpisodes { podcast_id } => self.feed.run(*podcast_id).await,
            JobKind::DownloadAudio { episode_id } => self.audio.run(*episode_id).await,
            JobKind::Transcribe {
                episode_id,
                part_index,
                audio_file_path,
            } => {
                self.transcription
                    .run(*episode_id, *part_index, audio_file_path.as_deref())
                    .await
            }
            JobKind::IndexEpisode { episode_id } => self.indexing.run(*episode_id).await,
        }
    }
}
