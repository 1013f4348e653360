//! Scripted fakes for the external capabilities, shared by unit tests.

use crate::audio::{part_count, part_path, AudioFetcher, AudioTools};
use crate::config::{Settings, StorageProvider};
use crate::embedding::Embedder;
use crate::error::{HarkError, Result};
use crate::feed::{FeedSource, ParsedFeed};
use crate::generation::Generator;
use crate::jobs::MemoryJobQueue;
use crate::orchestrator::{Components, Orchestrator};
use crate::pipeline::{
    AudioStage, FeedSync, IndexingStage, Pipeline, ProcessingStatus, TranscriptionStage,
};
use crate::store::{content_hash, Episode, MemoryStore, NewEpisode, NewPodcast, Podcast, Store};
use crate::transcription::{RawTranscript, Transcriber};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Script {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl Script {
    fn hit(&self, what: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(HarkError::InvalidInput(format!("scripted {} failure", what)));
        }
        Ok(())
    }
}

pub struct FakeFeed {
    feed: Mutex<ParsedFeed>,
    script: Script,
}

impl FakeFeed {
    pub fn new(feed: ParsedFeed) -> Self {
        Self {
            feed: Mutex::new(feed),
            script: Script::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.script.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn fetch(&self, _feed_url: &str) -> Result<ParsedFeed> {
        self.script.hit("feed")?;
        Ok(self.feed.lock().unwrap().clone())
    }
}

/// Writes a few bytes instead of downloading.
#[derive(Default)]
pub struct FakeFetcher {
    script: Script,
}

impl FakeFetcher {
    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.script.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, b"ID3")?;
        self.script.hit("fetch")?;
        Ok(3)
    }
}

/// Reports a fixed duration and "splits" by touching part files.
pub struct FakeAudio {
    duration: Option<f64>,
    script: Script,
}

impl FakeAudio {
    /// `None` makes every probe fail.
    pub fn with_duration(duration: Option<f64>) -> Self {
        Self {
            duration,
            script: Script::default(),
        }
    }

    pub fn splits(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// The next split writes its first part, then fails.
    pub fn fail_next(&self) {
        self.script.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioTools for FakeAudio {
    async fn probe_duration(&self, _path: &Path) -> Result<f64> {
        self.duration
            .ok_or_else(|| HarkError::ToolFailed("ffprobe returned error".to_string()))
    }

    async fn split(&self, source: &Path, total_seconds: f64, max_seconds: f64) -> Result<Vec<PathBuf>> {
        let mut parts = Vec::new();
        for index in 0..part_count(total_seconds, max_seconds) {
            let part = part_path(source, index);
            std::fs::write(&part, b"ID3")?;
            parts.push(part);
            if index == 0 {
                self.script.hit("split")?;
            }
        }
        Ok(parts)
    }
}

/// Returns transcripts scripted per file name.
#[derive(Default)]
pub struct FakeTranscriber {
    by_file: Mutex<HashMap<String, RawTranscript>>,
    fallback: Mutex<RawTranscript>,
    script: Script,
}

impl FakeTranscriber {
    pub fn returning(transcript: RawTranscript) -> Self {
        let fake = Self::default();
        *fake.fallback.lock().unwrap() = transcript;
        fake
    }

    pub fn script_file(&self, file_name: &str, transcript: RawTranscript) {
        self.by_file
            .lock()
            .unwrap()
            .insert(file_name.to_string(), transcript);
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.script.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<RawTranscript> {
        self.script.hit("transcription")?;
        let name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let scripted = self.by_file.lock().unwrap().get(&name).cloned();
        Ok(scripted.unwrap_or_else(|| self.fallback.lock().unwrap().clone()))
    }
}

/// Embeds text as a small deterministic vector unless a vector is scripted.
#[derive(Default)]
pub struct FakeEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    script: Script,
}

impl FakeEmbedder {
    pub fn script(&self, text: &str, vector: Vec<f32>) {
        self.vectors.lock().unwrap().insert(text.to_string(), vector);
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.script.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.script.hit("embedding")?;
        if let Some(vector) = self.vectors.lock().unwrap().get(text) {
            return Ok(vector.clone());
        }
        let words = text.split_whitespace().count() as f32;
        Ok(vec![1.0, words, text.len() as f32])
    }

    fn dimensions(&self) -> usize {
        3
    }
}

/// Echoes a fixed answer and remembers the last prompt.
pub struct FakeGenerator {
    answer: String,
    last_prompt: Mutex<Option<String>>,
    script: Script,
}

impl FakeGenerator {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            last_prompt: Mutex::new(None),
            script: Script::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        self.script.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, _system: Option<&str>, prompt: &str) -> Result<String> {
        self.script.hit("generation")?;
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        Ok(self.answer.clone())
    }
}

/// Create a podcast with one episode and return both.
pub async fn seed_episode(store: &dyn Store, title: &str) -> (Podcast, Episode) {
    let feed_url = format!("https://example.com/{}/feed.xml", title.replace(' ', "-"));
    let podcast = match store.find_podcast_by_feed_url(&feed_url).await.unwrap() {
        Some(p) => p,
        None => store
            .create_podcast(NewPodcast {
                feed_url,
                title: format!("{} Show", title),
                ..Default::default()
            })
            .await
            .unwrap(),
    };

    let audio_url = format!("https://cdn.example.com/{}.mp3", title.replace(' ', "-"));
    let episode = store
        .insert_episodes(&[NewEpisode {
            podcast_id: podcast.id,
            title: title.to_string(),
            description: None,
            guid: Some(format!("guid-{}", title)),
            content_hash: content_hash(title, &audio_url),
            audio_url,
            published_at: None,
        }])
        .await
        .unwrap()
        .remove(0);

    (podcast, episode)
}

/// Force an episode into a given state, bypassing the transition table.
pub async fn force_state(
    store: &dyn Store,
    episode: &Episode,
    status: ProcessingStatus,
    audio_file_path: Option<PathBuf>,
    expected_parts: Option<u32>,
) -> Episode {
    let current = store.find_episode(episode.id).await.unwrap().unwrap();
    let mut updated = current.clone();
    updated.status = status;
    updated.audio_file_path = audio_file_path;
    updated.expected_parts = expected_parts;
    assert!(store
        .update_episode_if_status(&updated, current.status)
        .await
        .unwrap());
    store.find_episode(episode.id).await.unwrap().unwrap()
}

/// In-memory store and queue with every external capability faked.
pub struct Rig {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub feed: Arc<FakeFeed>,
    pub fetcher: Arc<FakeFetcher>,
    pub audio: Arc<FakeAudio>,
    pub transcriber: Arc<FakeTranscriber>,
    pub embedder: Arc<FakeEmbedder>,
    pub generator: Arc<FakeGenerator>,
    pub audio_dir: tempfile::TempDir,
}

impl Rig {
    pub fn new(feed: ParsedFeed, transcript: RawTranscript) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            queue: Arc::new(MemoryJobQueue::new()),
            feed: Arc::new(FakeFeed::new(feed)),
            fetcher: Arc::new(FakeFetcher::default()),
            audio: Arc::new(FakeAudio::with_duration(Some(120.0))),
            transcriber: Arc::new(FakeTranscriber::returning(transcript)),
            embedder: Arc::new(FakeEmbedder::default()),
            generator: Arc::new(FakeGenerator::answering("It was about testing.")),
            audio_dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Stages wired to the fakes, splitting audio longer than an hour.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline {
            feed: FeedSync::new(self.store.clone(), self.queue.clone(), self.feed.clone()),
            audio: AudioStage::new(
                self.store.clone(),
                self.queue.clone(),
                self.fetcher.clone(),
                self.audio.clone(),
                self.audio_dir.path().to_path_buf(),
                3600.0,
            ),
            transcription: TranscriptionStage::new(
                self.store.clone(),
                self.queue.clone(),
                self.transcriber.clone(),
            ),
            indexing: IndexingStage::new(self.store.clone(), self.embedder.clone()),
        }
    }

    /// An orchestrator over the rig with fast polling and two workers.
    pub fn orchestrator(&self) -> Orchestrator {
        let mut settings = Settings::default();
        settings.storage.provider = StorageProvider::Memory;
        settings.audio.storage_path = self.audio_dir.path().to_string_lossy().to_string();
        settings.jobs.poll_delay_ms = 10;
        settings.jobs.dequeue_timeout_secs = 1;
        settings.jobs.parallelism = 2;
        settings.reconcile.interval_secs = 1;

        Orchestrator::with_components(
            settings,
            Components {
                store: self.store.clone(),
                queue: self.queue.clone(),
                feeds: self.feed.clone(),
                fetcher: self.fetcher.clone(),
                audio_tools: self.audio.clone(),
                transcriber: self.transcriber.clone(),
                embedder: self.embedder.clone(),
                generator: self.generator.clone(),
            },
        )
        .unwrap()
    }
}
