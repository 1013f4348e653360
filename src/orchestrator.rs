//! Wires settings into a running pipeline and exposes the operations the
//! CLI and HTTP server trigger.

use crate::audio::{AudioFetcher, AudioTools, FfmpegAudio, HttpFetcher};
use crate::config::{Prompts, Settings, StorageProvider};
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::error::{HarkError, Result};
use crate::feed::{FeedSource, RssFeedSource};
use crate::generation::{Generator, OpenAIGenerator};
use crate::jobs::{Job, JobQueue, MemoryJobQueue, SqliteJobQueue};
use crate::pipeline::{
    AudioStage, FeedSync, IndexingStage, Pipeline, ProcessingStatus, ReconcileReport,
    Reconciler, TranscriptionStage,
};
use crate::qa::{Answer, AnswerCache, AnswerService};
use crate::store::{Episode, MemoryStore, Podcast, SqliteStore, Store};
use crate::transcription::{create_transcriber, Transcriber};
use crate::worker::{WorkerHandle, WorkerPool, WorkerStatus};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const FEED_TIMEOUT: Duration = Duration::from_secs(60);

/// Storage and external capabilities the pipeline runs against.
pub struct Components {
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn JobQueue>,
    pub feeds: Arc<dyn FeedSource>,
    pub fetcher: Arc<dyn AudioFetcher>,
    pub audio_tools: Arc<dyn AudioTools>,
    pub transcriber: Arc<dyn Transcriber>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
}

impl Components {
    /// Build the configured storage backend and remote clients.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let (store, queue): (Arc<dyn Store>, Arc<dyn JobQueue>) = match settings.storage.provider {
            StorageProvider::Sqlite => {
                let path = settings.sqlite_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                info!("Using SQLite storage at {}", path.display());
                (
                    Arc::new(SqliteStore::open(&path)?),
                    Arc::new(SqliteJobQueue::open(&path)?),
                )
            }
            StorageProvider::Memory => {
                warn!("Using in-memory storage; nothing survives a restart");
                (Arc::new(MemoryStore::new()), Arc::new(MemoryJobQueue::new()))
            }
        };

        Ok(Self {
            store,
            queue,
            feeds: Arc::new(RssFeedSource::new(FEED_TIMEOUT)?),
            fetcher: Arc::new(HttpFetcher::from_settings(&settings.audio)?),
            audio_tools: Arc::new(FfmpegAudio::new()),
            transcriber: create_transcriber(&settings.transcription)?,
            embedder: Arc::new(OpenAIEmbedder::from_settings(&settings.embedding)?),
            generator: Arc::new(OpenAIGenerator::from_settings(&settings.generation)?),
        })
    }
}

/// Worker pool and reconciler running in the background.
pub struct Running {
    cancel: CancellationToken,
    workers: WorkerHandle,
    reconciler: Option<JoinHandle<()>>,
}

impl Running {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the reconciler and drain the workers.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Some(reconciler) = self.reconciler {
            if let Err(e) = reconciler.await {
                warn!("Reconciler exited abnormally: {}", e);
            }
        }
        self.workers.shutdown().await;
    }
}

pub struct Orchestrator {
    settings: Settings,
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<Pipeline>,
    reconciler: Arc<Reconciler>,
    answers: AnswerService,
    workers: WorkerPool,
}

impl Orchestrator {
    /// Create an orchestrator from configuration.
    pub fn new(settings: Settings) -> Result<Self> {
        let components = Components::from_settings(&settings)?;
        Self::with_components(settings, components)
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(settings: Settings, components: Components) -> Result<Self> {
        settings.validate()?;
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let Components {
            store,
            queue,
            feeds,
            fetcher,
            audio_tools,
            transcriber,
            embedder,
            generator,
        } = components;

        let pipeline = Arc::new(Pipeline {
            feed: FeedSync::new(store.clone(), queue.clone(), feeds),
            audio: AudioStage::new(
                store.clone(),
                queue.clone(),
                fetcher,
                audio_tools,
                settings.audio_dir(),
                settings.max_seconds_before_split(),
            ),
            transcription: TranscriptionStage::new(store.clone(), queue.clone(), transcriber),
            indexing: IndexingStage::new(store.clone(), embedder.clone()),
        });

        let answers = AnswerService::new(
            store.clone(),
            embedder,
            generator,
            prompts,
            settings.qa.top_k,
            AnswerCache::new(settings.cache_ttl()),
        );

        let reconciler = Arc::new(Reconciler::new(store.clone(), queue.clone()));
        let workers = WorkerPool::new(pipeline.clone(), queue.clone(), settings.jobs.clone());

        Ok(Self {
            settings,
            store,
            queue,
            pipeline,
            reconciler,
            answers,
            workers,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Start the worker pool and, if enabled, the reconciliation loop.
    pub fn start(&self) -> Running {
        let cancel = CancellationToken::new();
        let workers = self.workers.start(cancel.clone());
        let reconciler = self.settings.reconcile.enabled.then(|| {
            self.reconciler.clone().spawn(
                Duration::from_secs(self.settings.reconcile.interval_secs.max(1)),
                cancel.clone(),
            )
        });
        Running {
            cancel,
            workers,
            reconciler,
        }
    }

    /// Register a podcast feed and queue its first sync.
    pub async fn add_podcast(&self, feed_url: &str, download_until: Option<NaiveDate>) -> Result<Podcast> {
        let feed_url = feed_url.trim();
        url::Url::parse(feed_url)
            .map_err(|e| HarkError::InvalidInput(format!("Invalid feed URL {}: {}", feed_url, e)))?;
        self.pipeline.feed.add_podcast(feed_url, download_until).await
    }

    /// Queue a feed sync. Returns the job id.
    #[instrument(skip(self))]
    pub async fn sync_podcast(&self, podcast_id: i64) -> Result<String> {
        self.store
            .find_podcast(podcast_id)
            .await?
            .ok_or_else(|| HarkError::podcast_not_found(podcast_id))?;
        self.queue.enqueue(Job::sync_episodes(podcast_id)).await
    }

    pub async fn retry_episode(&self, episode_id: i64) -> Result<ProcessingStatus> {
        self.reconciler.retry_episode(episode_id).await
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconciler.run_cycle().await
    }

    pub async fn ask(&self, podcast_id: i64, question: &str) -> Result<Answer> {
        self.answers.answer(podcast_id, question).await
    }

    /// Pool and queue state. `limit` defaults to the configured preview size.
    pub async fn status(&self, limit: Option<usize>) -> Result<WorkerStatus> {
        self.workers
            .status(limit.unwrap_or(self.settings.jobs.status_limit))
            .await
    }

    pub async fn list_podcasts(&self) -> Result<Vec<Podcast>> {
        self.store.list_podcasts().await
    }

    /// A podcast with its episodes, newest first.
    pub async fn podcast(&self, podcast_id: i64) -> Result<(Podcast, Vec<Episode>)> {
        let podcast = self
            .store
            .find_podcast(podcast_id)
            .await?
            .ok_or_else(|| HarkError::podcast_not_found(podcast_id))?;
        let episodes = self.store.list_episodes(podcast_id).await?;
        Ok((podcast, episodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedEntry, ParsedFeed};
    use crate::testing::Rig;
    use crate::transcription::{RawSegment, RawTranscript};
    use tokio_test::{assert_err, assert_ok};

    fn rig() -> Rig {
        Rig::new(
            ParsedFeed {
                title: Some("Harbour Talk".to_string()),
                author: Some("Port Authority".to_string()),
                entries: vec![FeedEntry {
                    guid: Some("ferry-1".to_string()),
                    title: "All about ferries".to_string(),
                    description: None,
                    audio_url: "https://cdn.example.com/ferries.mp3".to_string(),
                    published_at: None,
                }],
                ..Default::default()
            },
            RawTranscript {
                text: String::new(),
                segments: vec![
                    RawSegment::new(0, 0.0, 4.0, "Ferries leave every hour.").with_speaker("Ann"),
                    RawSegment::new(1, 4.0, 9.0, "The last one is at midnight.").with_speaker("Bo"),
                ],
            },
        )
    }

    #[tokio::test]
    async fn test_add_sync_and_ask() {
        let rig = rig();
        let hark = rig.orchestrator();

        let podcast = hark.add_podcast("https://example.com/harbour.xml", None).await.unwrap();
        assert_eq!(podcast.title, "Harbour Talk");
        assert_eq!(podcast.author.as_deref(), Some("Port Authority"));

        let running = hark.start();
        let indexed = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let (_, episodes) = hark.podcast(podcast.id).await.unwrap();
                if episodes.len() == 1 && episodes[0].status == ProcessingStatus::Indexed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        running.shutdown().await;
        assert!(indexed.is_ok());

        let answer = hark.ask(podcast.id, "When do ferries leave?").await.unwrap();
        assert_eq!(answer.answer, "It was about testing.");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].speaker_labels.as_deref(), Some("Ann, Bo"));
        assert!(answer.citations[0]
            .text_snippet
            .starts_with("Ann: Ferries leave every hour. Bo: The last one"));
    }

    #[tokio::test]
    async fn test_duplicate_feed_is_rejected() {
        let rig = rig();
        let hark = rig.orchestrator();

        hark.add_podcast("https://example.com/harbour.xml", None).await.unwrap();
        let err = hark
            .add_podcast("https://example.com/harbour.xml", None)
            .await
            .unwrap_err();
        assert!(matches!(err, HarkError::AlreadyExists(_)));
        assert!(matches!(
            hark.add_podcast("not a url", None).await.unwrap_err(),
            HarkError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_sync_unknown_podcast() {
        let rig = rig();
        let hark = rig.orchestrator();
        let err = assert_err!(hark.sync_podcast(77).await);
        assert!(matches!(err, HarkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_uses_configured_limit() {
        let rig = rig();
        let hark = rig.orchestrator();
        let podcast = assert_ok!(hark.add_podcast("https://example.com/harbour.xml", None).await);
        assert_ok!(hark.sync_podcast(podcast.id).await);

        let status = assert_ok!(hark.status(None).await);
        assert_eq!(status.queue_size, 2);
        assert_eq!(status.parallelism, 2);
        assert_eq!(hark.status(Some(1)).await.unwrap().queued_jobs.len(), 1);
    }
}
