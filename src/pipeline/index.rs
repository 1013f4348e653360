//! `IndexEpisode`: group transcript segments into chunks and embed them.

use super::status::transition;
use super::{ProcessingStatus, StageOutcome};
use crate::embedding::Embedder;
use crate::error::{HarkError, Result};
use crate::store::{EmbeddingChunk, Episode, Store, TranscriptSegment};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Consecutive transcript segments per embedding chunk.
pub const SEGMENTS_PER_CHUNK: usize = 10;

/// A chunk before its embedding is known.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub chunk_index: u32,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    pub speaker_labels: Option<String>,
}

impl ChunkDraft {
    fn embedded(self, episode_id: i64, embedding: Vec<f32>) -> EmbeddingChunk {
        EmbeddingChunk {
            episode_id,
            chunk_index: self.chunk_index,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            text: self.text,
            speaker_labels: self.speaker_labels,
            embedding,
        }
    }
}

/// Partition ordered segments into fixed-size groups.
pub fn build_chunks(segments: &[TranscriptSegment], chunk_size: usize) -> Vec<ChunkDraft> {
    segments
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(|(index, group)| {
            let text = group
                .iter()
                .map(segment_text)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");

            let mut labels: Vec<&str> = Vec::new();
            for label in group.iter().filter_map(|s| s.speaker_label.as_deref()) {
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }

            ChunkDraft {
                chunk_index: index as u32,
                start_ms: group[0].start_ms,
                end_ms: group[group.len() - 1].end_ms,
                text: text.trim().to_string(),
                speaker_labels: (!labels.is_empty()).then(|| labels.join(", ")),
            }
        })
        .collect()
}

fn segment_text(segment: &TranscriptSegment) -> String {
    let text = segment.text.trim();
    match segment.speaker_label.as_deref() {
        Some(label) if !text.is_empty() => format!("{}: {}", label, text),
        _ => text.to_string(),
    }
}

pub struct IndexingStage {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
}

impl IndexingStage {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, episode_id: i64) -> Result<StageOutcome> {
        let episode = self
            .store
            .find_episode(episode_id)
            .await?
            .ok_or_else(|| HarkError::episode_not_found(episode_id))?;

        if self.store.chunks_exist(episode.id).await? {
            return Ok(StageOutcome::skipped("already indexed"));
        }

        let parts = self.store.transcribed_parts(episode.id).await?;
        if parts.is_empty() {
            return Ok(StageOutcome::skipped("no transcript yet"));
        }
        if (parts.len() as u32) < episode.part_count() {
            return Ok(StageOutcome::skipped(format!(
                "{} of {} parts transcribed",
                parts.len(),
                episode.part_count()
            )));
        }

        if !transition(
            self.store.as_ref(),
            episode.id,
            ProcessingStatus::Transcribed,
            ProcessingStatus::Indexing,
        )
        .await?
        {
            return Ok(StageOutcome::skipped("episode is not awaiting indexing"));
        }

        match self.index(&episode).await {
            Ok(count) => {
                transition(
                    self.store.as_ref(),
                    episode.id,
                    ProcessingStatus::Indexing,
                    ProcessingStatus::Indexed,
                )
                .await?;
                info!("Indexed episode {} into {} chunks", episode.id, count);
                Ok(StageOutcome::Completed)
            }
            Err(e) => {
                error!("Indexing episode {} failed: {}", episode.id, e);
                transition(
                    self.store.as_ref(),
                    episode.id,
                    ProcessingStatus::Indexing,
                    ProcessingStatus::Failed,
                )
                .await?;
                Ok(StageOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn index(&self, episode: &Episode) -> Result<usize> {
        let segments = self.store.find_segments(episode.id).await?;
        let drafts = build_chunks(&segments, SEGMENTS_PER_CHUNK);

        let mut chunks = Vec::with_capacity(drafts.len());
        for draft in drafts {
            debug!("Embedding chunk {} of episode {}", draft.chunk_index, episode.id);
            let embedding = self.embedder.embed(&draft.text).await?;
            if embedding.len() != self.embedder.dimensions() {
                return Err(HarkError::Embedding(format!(
                    "expected {} dimensions, got {}",
                    self.embedder.dimensions(),
                    embedding.len()
                )));
            }
            chunks.push(draft.embedded(episode.id, embedding));
        }

        // All or nothing: a failed embedding above leaves no chunks behind.
        self.store.insert_chunks(episode.id, &chunks).await
    }
}
