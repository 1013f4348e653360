//! Entity storage for podcasts, episodes, transcripts and embeddings.
//!
//! Provides a trait-based interface with SQLite and in-memory backends.

mod memory;
mod models;
mod sqlite;

pub use memory::MemoryStore;
pub use models::{
    content_hash, ChunkMatch, EmbeddingChunk, Episode, NewEpisode, NewPodcast, Podcast,
    TranscriptSegment,
};
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::pipeline::ProcessingStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Trait for storage backends.
///
/// Every method is atomic on its own. Status changes go through
/// [`Store::compare_and_set_status`] or [`Store::update_episode_if_status`]
/// so concurrent workers never overwrite each other blindly.
#[async_trait]
pub trait Store: Send + Sync {
    // Podcasts

    async fn create_podcast(&self, podcast: NewPodcast) -> Result<Podcast>;

    async fn find_podcast(&self, id: i64) -> Result<Option<Podcast>>;

    async fn find_podcast_by_feed_url(&self, feed_url: &str) -> Result<Option<Podcast>>;

    async fn list_podcasts(&self) -> Result<Vec<Podcast>>;

    async fn mark_podcast_synced(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    // Episodes

    /// Insert new episodes as DISCOVERED, all or nothing.
    async fn insert_episodes(&self, episodes: &[NewEpisode]) -> Result<Vec<Episode>>;

    async fn find_episode(&self, id: i64) -> Result<Option<Episode>>;

    async fn list_episodes(&self, podcast_id: i64) -> Result<Vec<Episode>>;

    async fn find_episodes_by_status(&self, status: ProcessingStatus) -> Result<Vec<Episode>>;

    async fn episode_exists_by_guid(&self, guid: &str) -> Result<bool>;

    async fn episode_exists_by_content_hash(&self, content_hash: &str) -> Result<bool>;

    /// Set `status = next` only if it currently equals `expected`.
    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: ProcessingStatus,
        next: ProcessingStatus,
    ) -> Result<bool>;

    /// Write every mutable field of `episode` only if the stored status
    /// currently equals `expected`.
    async fn update_episode_if_status(
        &self,
        episode: &Episode,
        expected: ProcessingStatus,
    ) -> Result<bool>;

    // Transcript segments

    /// Insert segments part by part. A part that already has any stored
    /// segment is left untouched, so two transcriptions of the same part
    /// never interleave. The check and the write are one atomic step.
    /// Returns the number inserted.
    async fn insert_segments(&self, segments: &[TranscriptSegment]) -> Result<usize>;

    async fn segments_exist(&self, episode_id: i64) -> Result<bool>;

    /// Part indexes with at least one stored segment.
    async fn transcribed_parts(&self, episode_id: i64) -> Result<BTreeSet<u32>>;

    /// All segments ordered by part then segment index.
    async fn find_segments(&self, episode_id: i64) -> Result<Vec<TranscriptSegment>>;

    // Embedding chunks

    /// Insert a complete chunk set. Inserts nothing and returns 0 if the
    /// episode already has chunks.
    async fn insert_chunks(&self, episode_id: i64, chunks: &[EmbeddingChunk]) -> Result<usize>;

    async fn chunks_exist(&self, episode_id: i64) -> Result<bool>;

    async fn find_chunks(&self, episode_id: i64) -> Result<Vec<EmbeddingChunk>>;

    /// Nearest chunks across one podcast's episodes, closest first.
    async fn search_chunks(
        &self,
        podcast_id: i64,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkMatch>>;
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Cosine distance: 0 for identical direction, 2 for opposite.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Sort by distance ascending and keep the first `limit`.
pub(crate) fn rank_matches(mut matches: Vec<ChunkMatch>, limit: usize) -> Vec<ChunkMatch> {
    matches.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(limit);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c)).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_distance_orders_closest_first() {
        let query = [1.0, 0.0];
        assert!(cosine_distance(&query, &[1.0, 0.1]) < cosine_distance(&query, &[0.5, 0.5]));
        assert!(cosine_distance(&query, &[0.5, 0.5]) < cosine_distance(&query, &[-1.0, 0.0]));
    }

    #[test]
    fn test_mismatched_lengths_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
