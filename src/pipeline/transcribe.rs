//! `Transcribe`: turn one audio part into transcript segments on the
//! episode timeline.
//!
//! Unsplit episodes use an episode-wide guard: once any segment exists the
//! job is a no-op. Split episodes guard per part, and only the job that
//! lands the last missing part moves the episode to TRANSCRIBED.

use super::status::transition;
use super::{ProcessingStatus, StageOutcome};
use crate::audio::part_path;
use crate::error::{HarkError, Result};
use crate::jobs::{Job, JobQueue};
use crate::store::{Episode, Store, TranscriptSegment};
use crate::transcription::{RawSegment, Transcriber};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub struct TranscriptionStage {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    transcriber: Arc<dyn Transcriber>,
}

impl TranscriptionStage {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            store,
            queue,
            transcriber,
        }
    }

    #[instrument(skip(self, audio_file_path))]
    pub async fn run(
        &self,
        episode_id: i64,
        part_index: u32,
        audio_file_path: Option<&Path>,
    ) -> Result<StageOutcome> {
        let episode = self
            .store
            .find_episode(episode_id)
            .await?
            .ok_or_else(|| HarkError::episode_not_found(episode_id))?;

        let landed = self.store.transcribed_parts(episode.id).await?;
        if let Some(reason) = guard(&episode, part_index, &landed) {
            info!("Skipping part {} of episode {}: {}", part_index, episode.id, reason);
            return Ok(StageOutcome::skipped(reason));
        }

        if !self.claim(episode.id).await? {
            return Ok(StageOutcome::skipped("episode is not ready for transcription"));
        }

        let path = audio_file_path
            .map(Path::to_path_buf)
            .or_else(|| default_audio_path(&episode, part_index));

        let stored = match self.transcribe_part(&episode, part_index, path).await {
            Ok(count) => count,
            Err(e) => {
                error!("Transcription of episode {} part {} failed: {}", episode.id, part_index, e);
                transition(
                    self.store.as_ref(),
                    episode.id,
                    ProcessingStatus::Transcribing,
                    ProcessingStatus::Failed,
                )
                .await?;
                return Ok(StageOutcome::Failed(e.to_string()));
            }
        };
        if stored == 0 {
            // A concurrent job for the same part persisted first and owns
            // the completion step.
            warn!("Episode {} part {} was transcribed twice, keeping the first", episode.id, part_index);
            return Ok(StageOutcome::skipped("part already transcribed"));
        }
        info!("Stored {} segments for episode {} part {}", stored, episode.id, part_index);

        let landed = self.store.transcribed_parts(episode.id).await?;
        match first_missing_part(episode.part_count(), &landed) {
            None => {
                // Reconciliation may have regressed a slow transcription
                // back to DOWNLOADED; the segments are in, so take it back.
                if self.claim(episode.id).await?
                    && transition(
                        self.store.as_ref(),
                        episode.id,
                        ProcessingStatus::Transcribing,
                        ProcessingStatus::Transcribed,
                    )
                    .await?
                {
                    self.queue.enqueue(Job::index_episode(episode.id)).await?;
                    info!("Episode {} fully transcribed", episode.id);
                }
            }
            Some(next) if next > part_index => {
                let next_path = default_audio_path(&episode, next);
                self.queue
                    .enqueue(Job::transcribe(episode.id, next, next_path))
                    .await?;
            }
            Some(_) => {}
        }

        Ok(StageOutcome::Completed)
    }

    /// Move DOWNLOADED -> TRANSCRIBING, or join a transcription already in
    /// progress for another part.
    async fn claim(&self, episode_id: i64) -> Result<bool> {
        if transition(
            self.store.as_ref(),
            episode_id,
            ProcessingStatus::Downloaded,
            ProcessingStatus::Transcribing,
        )
        .await?
        {
            return Ok(true);
        }

        let current = self.store.find_episode(episode_id).await?.map(|e| e.status);
        Ok(current == Some(ProcessingStatus::Transcribing))
    }

    async fn transcribe_part(
        &self,
        episode: &Episode,
        part_index: u32,
        path: Option<PathBuf>,
    ) -> Result<usize> {
        let path = path.ok_or_else(|| {
            HarkError::Transcription(format!("Episode {} has no audio file", episode.id))
        })?;

        let transcript = self.transcriber.transcribe(&path).await?;
        if transcript.segments.is_empty() {
            return Err(HarkError::Transcription(format!(
                "No segments returned for {}",
                path.display()
            )));
        }

        let existing = self.store.find_segments(episode.id).await?;
        let offset_ms = time_offset_ms(&existing, part_index);
        let segments = place_segments(episode.id, part_index, offset_ms, &transcript.segments);

        self.store.insert_segments(&segments).await
    }
}

/// Why a job should not run, if it should not.
fn guard(episode: &Episode, part_index: u32, landed: &BTreeSet<u32>) -> Option<String> {
    if !episode.is_split() {
        return (!landed.is_empty()).then(|| "already transcribed".to_string());
    }

    let parts = episode.part_count();
    if part_index >= parts {
        return Some(format!("part {} of {} does not exist", part_index, parts));
    }
    if landed.contains(&part_index) {
        return Some("part already transcribed".to_string());
    }
    // The offset of part i depends on every earlier part being stored. The
    // job that lands the preceding part re-queues this one.
    if let Some(missing) = (0..part_index).find(|p| !landed.contains(p)) {
        return Some(format!("waiting for part {}", missing));
    }
    None
}

pub(crate) fn first_missing_part(parts: u32, landed: &BTreeSet<u32>) -> Option<u32> {
    (0..parts).find(|p| !landed.contains(p))
}

/// Audio for a part when the job did not say where it is.
pub(crate) fn default_audio_path(episode: &Episode, part_index: u32) -> Option<PathBuf> {
    let source = episode.audio_file_path.as_ref()?;
    if episode.is_split() {
        Some(part_path(source, part_index))
    } else {
        Some(source.clone())
    }
}

/// Where part `part_index` starts on the episode timeline: the latest end
/// among segments of earlier parts.
pub fn time_offset_ms(existing: &[TranscriptSegment], part_index: u32) -> i64 {
    existing
        .iter()
        .filter(|s| s.part_index < part_index)
        .map(|s| s.end_ms)
        .max()
        .unwrap_or(0)
}

/// Convert part-relative seconds into absolute milliseconds.
pub fn place_segments(
    episode_id: i64,
    part_index: u32,
    offset_ms: i64,
    raw: &[RawSegment],
) -> Vec<TranscriptSegment> {
    raw.iter()
        .enumerate()
        .map(|(index, segment)| TranscriptSegment {
            episode_id,
            part_index,
            segment_index: index as u32,
            start_ms: seconds_to_ms(segment.start) + offset_ms,
            end_ms: seconds_to_ms(segment.end) + offset_ms,
            text: segment.text.trim().to_string(),
            speaker_label: segment.speaker.clone(),
        })
        .collect()
}

fn seconds_to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}
