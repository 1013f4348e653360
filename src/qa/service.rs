//! Retrieval and answer generation.

use super::{cache_key, format_timestamp, Answer, AnswerCache, Citation, SNIPPET_CHARS};
use crate::config::Prompts;
use crate::embedding::Embedder;
use crate::error::{HarkError, Result};
use crate::generation::Generator;
use crate::store::{ChunkMatch, Store};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Returned when nothing in the podcast matches the question.
pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have enough information to answer this question.";

pub struct AnswerService {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    prompts: Prompts,
    top_k: usize,
    cache: AnswerCache,
}

impl AnswerService {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        prompts: Prompts,
        top_k: usize,
        cache: AnswerCache,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            prompts,
            top_k: top_k.max(1),
            cache,
        }
    }

    /// Answer `question` from the episodes of one podcast.
    #[instrument(skip(self), fields(question = %question))]
    pub async fn answer(&self, podcast_id: i64, question: &str) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(HarkError::InvalidInput("Question is empty".to_string()));
        }

        let key = cache_key(podcast_id, question);
        if let Some(cached) = self.cache.get(&key) {
            debug!("Answer cache hit for {}", key);
            return Ok(cached);
        }

        self.store
            .find_podcast(podcast_id)
            .await?
            .ok_or_else(|| HarkError::podcast_not_found(podcast_id))?;

        let query = self.embedder.embed(question).await?;
        let matches = self.store.search_chunks(podcast_id, &query, self.top_k).await?;

        // Not cached: the podcast may simply not be indexed yet.
        if matches.is_empty() {
            info!("No indexed content matches for podcast {}", podcast_id);
            return Ok(Answer {
                answer: INSUFFICIENT_INFORMATION.to_string(),
                citations: Vec::new(),
            });
        }

        let mut vars = HashMap::new();
        vars.insert("question".to_string(), question.to_string());
        vars.insert("context".to_string(), build_context(&matches));
        let prompt = self.prompts.render_with_custom(&self.prompts.qa.user, &vars);

        let text = self
            .generator
            .generate(self.prompts.qa.system.as_deref(), &prompt)
            .await?;

        let answer = Answer {
            answer: text.trim().to_string(),
            citations: matches.iter().map(citation).collect(),
        };
        self.cache.insert(key, answer.clone());
        info!("Answered from {} chunks", matches.len());
        Ok(answer)
    }
}

fn build_context(matches: &[ChunkMatch]) -> String {
    matches
        .iter()
        .map(|m| {
            format!(
                "From episode \"{}\" ({} - {}): {}\n\n",
                m.episode_title,
                format_timestamp(m.chunk.start_ms),
                format_timestamp(m.chunk.end_ms),
                m.chunk.text
            )
        })
        .collect()
}

fn citation(m: &ChunkMatch) -> Citation {
    Citation {
        episode_id: m.chunk.episode_id,
        episode_title: m.episode_title.clone(),
        audio_url: m.audio_url.clone(),
        start_ms: m.chunk.start_ms,
        end_ms: m.chunk.end_ms,
        speaker_labels: m.chunk.speaker_labels.clone(),
        text_snippet: m.chunk.text.chars().take(SNIPPET_CHARS).collect(),
        listen_link: format!("/episodes/{}?t={}", m.chunk.episode_id, m.chunk.start_ms / 1000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ProcessingStatus;
    use crate::store::{EmbeddingChunk, MemoryStore};
    use crate::testing::{force_state, seed_episode, FakeEmbedder, FakeGenerator};
    use std::time::Duration;

    struct Fixture {
        service: AnswerService,
        store: Arc<MemoryStore>,
        embedder: Arc<FakeEmbedder>,
        generator: Arc<FakeGenerator>,
    }

    fn fixture(ttl: Duration) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(FakeEmbedder::default());
        let generator = Arc::new(FakeGenerator::answering(" The hosts talked about ferries. "));
        let service = AnswerService::new(
            store.clone(),
            embedder.clone(),
            generator.clone(),
            Prompts::default(),
            5,
            AnswerCache::new(ttl),
        );
        Fixture {
            service,
            store,
            embedder,
            generator,
        }
    }

    /// An indexed episode with one long chunk that matches any question.
    async fn indexed_podcast(store: &MemoryStore) -> i64 {
        let (podcast, episode) = seed_episode(store, "ferries").await;
        force_state(store, &episode, ProcessingStatus::Indexed, None, Some(1)).await;
        store
            .insert_chunks(
                episode.id,
                &[EmbeddingChunk {
                    episode_id: episode.id,
                    chunk_index: 0,
                    start_ms: 3_725_000,
                    end_ms: 3_790_000,
                    text: "x".repeat(250),
                    speaker_labels: Some("Host".to_string()),
                    embedding: vec![1.0, 2.0, 3.0],
                }],
            )
            .await
            .unwrap();
        podcast.id
    }

    #[tokio::test]
    async fn test_answer_with_citations() {
        let f = fixture(Duration::from_secs(3600));
        let podcast_id = indexed_podcast(&f.store).await;

        let answer = f.service.answer(podcast_id, "What about ferries?").await.unwrap();

        assert_eq!(answer.answer, "The hosts talked about ferries.");
        assert_eq!(answer.citations.len(), 1);
        let citation = &answer.citations[0];
        assert_eq!(citation.episode_title, "ferries");
        assert_eq!(citation.text_snippet.len(), 200);
        assert_eq!(citation.speaker_labels.as_deref(), Some("Host"));
        assert_eq!(citation.listen_link, format!("/episodes/{}?t=3725", citation.episode_id));

        let prompt = f.generator.last_prompt().unwrap();
        assert!(prompt.contains("From episode \"ferries\" (1:02:05 - 1:03:10): xxx"));
        assert!(prompt.contains("Question: What about ferries?"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_and_expiry() {
        let f = fixture(Duration::from_secs(60 * 60));
        let podcast_id = indexed_podcast(&f.store).await;

        f.service.answer(podcast_id, "What about ferries?").await.unwrap();
        f.service.answer(podcast_id, "what about FERRIES?").await.unwrap();
        assert_eq!(f.embedder.calls(), 1);
        assert_eq!(f.generator.calls(), 1);

        tokio::time::advance(Duration::from_secs(60 * 60 + 1)).await;
        f.service.answer(podcast_id, "What about ferries?").await.unwrap();
        assert_eq!(f.embedder.calls(), 2);
        assert_eq!(f.generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_matches_falls_back_and_is_not_cached() {
        let f = fixture(Duration::from_secs(3600));
        let (podcast, _) = seed_episode(f.store.as_ref(), "unindexed").await;

        let answer = f.service.answer(podcast.id, "Anything?").await.unwrap();
        assert_eq!(answer.answer, INSUFFICIENT_INFORMATION);
        assert!(answer.citations.is_empty());
        assert_eq!(f.generator.calls(), 0);

        f.service.answer(podcast.id, "Anything?").await.unwrap();
        assert_eq!(f.embedder.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_podcast() {
        let f = fixture(Duration::from_secs(3600));
        let err = f.service.answer(42, "Hello?").await.unwrap_err();
        assert!(matches!(err, HarkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_generation_failure_is_not_cached() {
        let f = fixture(Duration::from_secs(3600));
        let podcast_id = indexed_podcast(&f.store).await;
        f.generator.fail_next();

        assert!(f.service.answer(podcast_id, "Ferries?").await.is_err());
        assert!(f.service.answer(podcast_id, "Ferries?").await.is_ok());
        assert_eq!(f.generator.calls(), 2);
    }
}
