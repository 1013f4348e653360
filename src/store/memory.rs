//! In-memory store implementation.

use super::{
    cosine_distance, rank_matches, ChunkMatch, EmbeddingChunk, Episode, NewEpisode, NewPodcast,
    Podcast, Store, TranscriptSegment,
};
use crate::error::{HarkError, Result};
use crate::pipeline::ProcessingStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    next_podcast_id: i64,
    next_episode_id: i64,
    podcasts: BTreeMap<i64, Podcast>,
    episodes: BTreeMap<i64, Episode>,
    segments: BTreeMap<(i64, u32, u32), TranscriptSegment>,
    chunks: BTreeMap<(i64, u32), EmbeddingChunk>,
}

/// Store held entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| HarkError::Storage(format!("Failed to acquire lock: {}", e)))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_podcast(&self, podcast: NewPodcast) -> Result<Podcast> {
        let mut inner = self.lock()?;
        if inner.podcasts.values().any(|p| p.feed_url == podcast.feed_url) {
            return Err(HarkError::AlreadyExists(format!("Podcast feed {}", podcast.feed_url)));
        }

        inner.next_podcast_id += 1;
        let now = Utc::now();
        let created = Podcast {
            id: inner.next_podcast_id,
            feed_url: podcast.feed_url,
            title: podcast.title,
            description: podcast.description,
            image_url: podcast.image_url,
            author: podcast.author,
            created_at: now,
            updated_at: now,
            last_synced_at: None,
            download_until: podcast.download_until,
        };
        inner.podcasts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_podcast(&self, id: i64) -> Result<Option<Podcast>> {
        Ok(self.lock()?.podcasts.get(&id).cloned())
    }

    async fn find_podcast_by_feed_url(&self, feed_url: &str) -> Result<Option<Podcast>> {
        Ok(self
            .lock()?
            .podcasts
            .values()
            .find(|p| p.feed_url == feed_url)
            .cloned())
    }

    async fn list_podcasts(&self) -> Result<Vec<Podcast>> {
        Ok(self.lock()?.podcasts.values().cloned().collect())
    }

    async fn mark_podcast_synced(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock()?;
        let podcast = inner
            .podcasts
            .get_mut(&id)
            .ok_or_else(|| HarkError::podcast_not_found(id))?;
        podcast.last_synced_at = Some(at);
        podcast.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_episodes(&self, episodes: &[NewEpisode]) -> Result<Vec<Episode>> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let mut created = Vec::with_capacity(episodes.len());

        for new in episodes {
            inner.next_episode_id += 1;
            let episode = Episode {
                id: inner.next_episode_id,
                podcast_id: new.podcast_id,
                title: new.title.clone(),
                description: new.description.clone(),
                guid: new.guid.clone(),
                content_hash: new.content_hash.clone(),
                audio_url: new.audio_url.clone(),
                audio_file_path: None,
                published_at: new.published_at,
                duration_seconds: None,
                expected_parts: None,
                status: ProcessingStatus::Discovered,
                created_at: now,
                updated_at: now,
            };
            inner.episodes.insert(episode.id, episode.clone());
            created.push(episode);
        }

        Ok(created)
    }

    async fn find_episode(&self, id: i64) -> Result<Option<Episode>> {
        Ok(self.lock()?.episodes.get(&id).cloned())
    }

    async fn list_episodes(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        let mut episodes: Vec<Episode> = self
            .lock()?
            .episodes
            .values()
            .filter(|e| e.podcast_id == podcast_id)
            .cloned()
            .collect();
        // Newest first, undated last, matching the SQLite ordering.
        episodes.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(b.id.cmp(&a.id)));
        Ok(episodes)
    }

    async fn find_episodes_by_status(&self, status: ProcessingStatus) -> Result<Vec<Episode>> {
        Ok(self
            .lock()?
            .episodes
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn episode_exists_by_guid(&self, guid: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .episodes
            .values()
            .any(|e| e.guid.as_deref() == Some(guid)))
    }

    async fn episode_exists_by_content_hash(&self, content_hash: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .episodes
            .values()
            .any(|e| e.content_hash == content_hash))
    }

    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: ProcessingStatus,
        next: ProcessingStatus,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.episodes.get_mut(&id) {
            Some(episode) if episode.status == expected => {
                episode.status = next;
                episode.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(HarkError::episode_not_found(id)),
        }
    }

    async fn update_episode_if_status(
        &self,
        episode: &Episode,
        expected: ProcessingStatus,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.episodes.get_mut(&episode.id) {
            Some(stored) if stored.status == expected => {
                let created_at = stored.created_at;
                *stored = episode.clone();
                stored.created_at = created_at;
                stored.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(HarkError::episode_not_found(episode.id)),
        }
    }

    async fn insert_segments(&self, segments: &[TranscriptSegment]) -> Result<usize> {
        let mut inner = self.lock()?;
        let taken: BTreeSet<(i64, u32)> = segments
            .iter()
            .map(|s| (s.episode_id, s.part_index))
            .filter(|&(episode_id, part)| {
                inner
                    .segments
                    .range((episode_id, part, 0)..=(episode_id, part, u32::MAX))
                    .next()
                    .is_some()
            })
            .collect();

        let mut inserted = 0;
        for segment in segments {
            if taken.contains(&(segment.episode_id, segment.part_index)) {
                continue;
            }
            let key = (segment.episode_id, segment.part_index, segment.segment_index);
            if inner.segments.insert(key, segment.clone()).is_none() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn segments_exist(&self, episode_id: i64) -> Result<bool> {
        Ok(self
            .lock()?
            .segments
            .range((episode_id, 0, 0)..=(episode_id, u32::MAX, u32::MAX))
            .next()
            .is_some())
    }

    async fn transcribed_parts(&self, episode_id: i64) -> Result<BTreeSet<u32>> {
        Ok(self
            .lock()?
            .segments
            .range((episode_id, 0, 0)..=(episode_id, u32::MAX, u32::MAX))
            .map(|((_, part, _), _)| *part)
            .collect())
    }

    async fn find_segments(&self, episode_id: i64) -> Result<Vec<TranscriptSegment>> {
        Ok(self
            .lock()?
            .segments
            .range((episode_id, 0, 0)..=(episode_id, u32::MAX, u32::MAX))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn insert_chunks(&self, episode_id: i64, chunks: &[EmbeddingChunk]) -> Result<usize> {
        let mut inner = self.lock()?;
        let exists = inner
            .chunks
            .range((episode_id, 0)..=(episode_id, u32::MAX))
            .next()
            .is_some();
        if exists {
            return Ok(0);
        }

        for chunk in chunks {
            inner
                .chunks
                .insert((episode_id, chunk.chunk_index), chunk.clone());
        }
        Ok(chunks.len())
    }

    async fn chunks_exist(&self, episode_id: i64) -> Result<bool> {
        Ok(self
            .lock()?
            .chunks
            .range((episode_id, 0)..=(episode_id, u32::MAX))
            .next()
            .is_some())
    }

    async fn find_chunks(&self, episode_id: i64) -> Result<Vec<EmbeddingChunk>> {
        Ok(self
            .lock()?
            .chunks
            .range((episode_id, 0)..=(episode_id, u32::MAX))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn search_chunks(
        &self,
        podcast_id: i64,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let inner = self.lock()?;
        let matches = inner
            .chunks
            .values()
            .filter_map(|chunk| {
                let episode = inner.episodes.get(&chunk.episode_id)?;
                if episode.podcast_id != podcast_id {
                    return None;
                }
                Some(ChunkMatch {
                    chunk: chunk.clone(),
                    episode_title: episode.title.clone(),
                    audio_url: episode.audio_url.clone(),
                    distance: cosine_distance(query_embedding, &chunk.embedding),
                })
            })
            .collect();

        Ok(rank_matches(matches, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::content_hash;

    fn new_episode(podcast_id: i64, title: &str) -> NewEpisode {
        let audio_url = format!("https://cdn.example.com/{}.mp3", title);
        NewEpisode {
            podcast_id,
            title: title.to_string(),
            description: None,
            guid: Some(format!("guid-{}", title)),
            content_hash: content_hash(title, &audio_url),
            audio_url,
            published_at: None,
        }
    }

    #[tokio::test]
    async fn test_compare_and_set_status() {
        let store = MemoryStore::new();
        let episode = store
            .insert_episodes(&[new_episode(1, "a")])
            .await
            .unwrap()
            .remove(0);

        use ProcessingStatus::*;
        assert!(store.compare_and_set_status(episode.id, Discovered, Downloading).await.unwrap());
        assert!(!store.compare_and_set_status(episode.id, Discovered, Downloading).await.unwrap());
        assert_eq!(store.find_episode(episode.id).await.unwrap().unwrap().status, Downloading);
        assert!(store.compare_and_set_status(999, Discovered, Downloading).await.is_err());
    }

    #[tokio::test]
    async fn test_segments_written_once_per_part() {
        let store = MemoryStore::new();
        let segment = |part, index| TranscriptSegment {
            episode_id: 1,
            part_index: part,
            segment_index: index,
            start_ms: 0,
            end_ms: 1000,
            text: "hi".to_string(),
            speaker_label: None,
        };

        assert_eq!(store.insert_segments(&[segment(0, 0), segment(0, 1)]).await.unwrap(), 2);
        assert_eq!(store.insert_segments(&[segment(0, 1), segment(1, 0)]).await.unwrap(), 1);
        assert_eq!(store.transcribed_parts(1).await.unwrap(), BTreeSet::from([0, 1]));

        // A stored part never gains extra segments from a later write.
        assert_eq!(store.insert_segments(&[segment(0, 2), segment(0, 3)]).await.unwrap(), 0);
        assert_eq!(store.find_segments(1).await.unwrap().len(), 3);
        assert!(!store.segments_exist(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_chunk_set_written_once() {
        let store = MemoryStore::new();
        let chunk = |index| EmbeddingChunk {
            episode_id: 3,
            chunk_index: index,
            start_ms: 0,
            end_ms: 10,
            text: "t".to_string(),
            speaker_labels: None,
            embedding: vec![1.0, 0.0],
        };

        assert_eq!(store.insert_chunks(3, &[chunk(0), chunk(1)]).await.unwrap(), 2);
        assert_eq!(store.insert_chunks(3, &[chunk(0), chunk(1), chunk(2)]).await.unwrap(), 0);
        assert_eq!(store.find_chunks(3).await.unwrap().len(), 2);
    }
}
