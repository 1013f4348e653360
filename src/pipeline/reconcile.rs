//! Periodic repair of episodes whose jobs were lost, and manual retry of
//! failed episodes.
//!
//! The queue never re-delivers a job, so this loop is the only thing that
//! turns a crashed worker's half-finished episode back into queued work.
//! Every action it takes is safe to repeat: the stage guards turn a
//! duplicate job into a no-op.

use super::status::transition;
use super::transcribe::{default_audio_path, first_missing_part};
use super::ProcessingStatus;
use crate::error::{HarkError, Result};
use crate::jobs::{Job, JobQueue};
use crate::store::{Episode, Store};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub marked_transcribed: usize,
    pub requeued_downloads: usize,
    pub requeued_transcriptions: usize,
    pub requeued_indexes: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Run one pass over TRANSCRIBING and TRANSCRIBED episodes.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        // Episodes already handed an IndexEpisode this cycle.
        let mut indexed = HashSet::new();

        for episode in self
            .store
            .find_episodes_by_status(ProcessingStatus::Transcribing)
            .await?
        {
            if let Err(e) = self.recover_transcribing(&episode, &mut indexed, &mut report).await {
                warn!("Could not reconcile episode {}: {}", episode.id, e);
            }
        }

        for episode in self
            .store
            .find_episodes_by_status(ProcessingStatus::Transcribed)
            .await?
        {
            if let Err(e) = self.ensure_indexed(&episode, &mut indexed, &mut report).await {
                warn!("Could not reconcile episode {}: {}", episode.id, e);
            }
        }

        if report.is_empty() {
            debug!("Reconciliation found nothing to do");
        } else {
            info!("Reconciliation: {:?}", report);
        }
        Ok(report)
    }

    async fn recover_transcribing(
        &self,
        episode: &Episode,
        indexed: &mut HashSet<i64>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let landed = self.store.transcribed_parts(episode.id).await?;

        if !landed.is_empty() {
            if let Some(missing) = first_missing_part(episode.part_count(), &landed) {
                self.queue
                    .enqueue(Job::transcribe(
                        episode.id,
                        missing,
                        default_audio_path(episode, missing),
                    ))
                    .await?;
                report.requeued_transcriptions += 1;
                return Ok(());
            }

            if transition(
                self.store.as_ref(),
                episode.id,
                ProcessingStatus::Transcribing,
                ProcessingStatus::Transcribed,
            )
            .await?
            {
                report.marked_transcribed += 1;
                self.ensure_indexed(episode, indexed, report).await?;
            }
            return Ok(());
        }

        match &episode.audio_file_path {
            None => {
                if transition(
                    self.store.as_ref(),
                    episode.id,
                    ProcessingStatus::Transcribing,
                    ProcessingStatus::Discovered,
                )
                .await?
                {
                    self.queue.enqueue(Job::download_audio(episode.id)).await?;
                    report.requeued_downloads += 1;
                }
            }
            Some(_) => {
                if transition(
                    self.store.as_ref(),
                    episode.id,
                    ProcessingStatus::Transcribing,
                    ProcessingStatus::Downloaded,
                )
                .await?
                {
                    self.queue
                        .enqueue(Job::transcribe(episode.id, 0, default_audio_path(episode, 0)))
                        .await?;
                    report.requeued_transcriptions += 1;
                }
            }
        }
        Ok(())
    }

    async fn ensure_indexed(
        &self,
        episode: &Episode,
        indexed: &mut HashSet<i64>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        if indexed.contains(&episode.id) {
            return Ok(());
        }
        if !self.store.segments_exist(episode.id).await? || self.store.chunks_exist(episode.id).await? {
            return Ok(());
        }
        self.queue.enqueue(Job::index_episode(episode.id)).await?;
        indexed.insert(episode.id);
        report.requeued_indexes += 1;
        Ok(())
    }

    /// Requeue a FAILED episode from the furthest point its stored
    /// artifacts allow. Returns the status it was moved to.
    #[instrument(skip(self))]
    pub async fn retry_episode(&self, episode_id: i64) -> Result<ProcessingStatus> {
        let episode = self
            .store
            .find_episode(episode_id)
            .await?
            .ok_or_else(|| HarkError::episode_not_found(episode_id))?;

        if episode.status != ProcessingStatus::Failed {
            return Err(HarkError::InvalidInput(format!(
                "Episode {} is {}, only FAILED episodes can be retried",
                episode.id, episode.status
            )));
        }

        let landed = self.store.transcribed_parts(episode.id).await?;
        let missing = first_missing_part(episode.part_count(), &landed);

        let (target, job) = if !landed.is_empty() && missing.is_none() {
            (ProcessingStatus::Transcribed, Job::index_episode(episode.id))
        } else if self.audio_available(&episode).await {
            let part = missing.unwrap_or(0);
            (
                ProcessingStatus::Downloaded,
                Job::transcribe(episode.id, part, default_audio_path(&episode, part)),
            )
        } else {
            (ProcessingStatus::Discovered, Job::download_audio(episode.id))
        };

        if !transition(self.store.as_ref(), episode.id, ProcessingStatus::Failed, target).await? {
            return Err(HarkError::InvalidInput(format!(
                "Episode {} changed state during retry",
                episode.id
            )));
        }
        self.queue.enqueue(job).await?;
        info!("Retrying episode {} from {}", episode.id, target);
        Ok(target)
    }

    async fn audio_available(&self, episode: &Episode) -> bool {
        let parts = episode.part_count();
        for part in 0..parts {
            let Some(path) = default_audio_path(episode, part) else {
                return false;
            };
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return false;
            }
        }
        true
    }

    /// Run cycles on a fixed interval until cancelled.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Reconciler started, interval {:?}", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_cycle().await {
                            warn!("Reconciliation cycle failed: {}", e);
                        }
                    }
                }
            }
            info!("Reconciler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobKind, MemoryJobQueue};
    use crate::store::{EmbeddingChunk, MemoryStore, TranscriptSegment};
    use crate::testing::{force_state, seed_episode};
    use std::path::PathBuf;

    fn fixture() -> (Reconciler, Arc<MemoryStore>, Arc<MemoryJobQueue>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        (Reconciler::new(store.clone(), queue.clone()), store, queue)
    }

    async fn drain(queue: &MemoryJobQueue) -> Vec<JobKind> {
        let mut jobs = Vec::new();
        while let Some(job) = queue.dequeue(Duration::ZERO).await.unwrap() {
            jobs.push(job.kind);
        }
        jobs
    }

    fn segment(episode_id: i64, part: u32) -> TranscriptSegment {
        TranscriptSegment {
            episode_id,
            part_index: part,
            segment_index: 0,
            start_ms: 0,
            end_ms: 1000,
            text: "hello".to_string(),
            speaker_label: None,
        }
    }

    async fn status(store: &MemoryStore, id: i64) -> ProcessingStatus {
        store.find_episode(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_transcribing_with_segments_becomes_transcribed() {
        let (reconciler, store, queue) = fixture();
        let (_, episode) = seed_episode(store.as_ref(), "crashed after persist").await;
        force_state(store.as_ref(), &episode, ProcessingStatus::Transcribing, Some("/a.mp3".into()), Some(1)).await;
        store.insert_segments(&[segment(episode.id, 0)]).await.unwrap();

        let report = reconciler.run_cycle().await.unwrap();

        assert_eq!(status(&store, episode.id).await, ProcessingStatus::Transcribed);
        assert_eq!(report.marked_transcribed, 1);
        // One index job even though the second scan also sees the episode.
        assert_eq!(drain(&queue).await, vec![JobKind::IndexEpisode { episode_id: episode.id }]);
    }

    #[tokio::test]
    async fn test_transcribing_without_audio_regresses_to_discovered() {
        let (reconciler, store, queue) = fixture();
        let (_, episode) = seed_episode(store.as_ref(), "lost download").await;
        force_state(store.as_ref(), &episode, ProcessingStatus::Transcribing, None, None).await;

        reconciler.run_cycle().await.unwrap();

        assert_eq!(status(&store, episode.id).await, ProcessingStatus::Discovered);
        assert_eq!(drain(&queue).await, vec![JobKind::DownloadAudio { episode_id: episode.id }]);
    }

    #[tokio::test]
    async fn test_transcribing_with_audio_regresses_to_downloaded() {
        let (reconciler, store, queue) = fixture();
        let (_, episode) = seed_episode(store.as_ref(), "lost transcription").await;
        let path = PathBuf::from("/audio/episode_3.mp3");
        force_state(store.as_ref(), &episode, ProcessingStatus::Transcribing, Some(path.clone()), Some(1)).await;

        reconciler.run_cycle().await.unwrap();

        assert_eq!(status(&store, episode.id).await, ProcessingStatus::Downloaded);
        assert_eq!(
            drain(&queue).await,
            vec![JobKind::Transcribe {
                episode_id: episode.id,
                part_index: 0,
                audio_file_path: Some(path),
            }]
        );
    }

    #[tokio::test]
    async fn test_partial_split_requeues_missing_part() {
        let (reconciler, store, queue) = fixture();
        let (_, episode) = seed_episode(store.as_ref(), "half done").await;
        let path = PathBuf::from("/audio/episode_4.mp3");
        force_state(store.as_ref(), &episode, ProcessingStatus::Transcribing, Some(path.clone()), Some(3)).await;
        store.insert_segments(&[segment(episode.id, 0)]).await.unwrap();

        let report = reconciler.run_cycle().await.unwrap();

        assert_eq!(report.requeued_transcriptions, 1);
        assert_eq!(status(&store, episode.id).await, ProcessingStatus::Transcribing);
        assert_eq!(
            drain(&queue).await,
            vec![JobKind::Transcribe {
                episode_id: episode.id,
                part_index: 1,
                audio_file_path: Some(PathBuf::from("/audio/episode_4_part1.mp3")),
            }]
        );
    }

    #[tokio::test]
    async fn test_transcribed_without_chunks_gets_index_job() {
        let (reconciler, store, queue) = fixture();
        let (_, pending) = seed_episode(store.as_ref(), "needs index").await;
        force_state(store.as_ref(), &pending, ProcessingStatus::Transcribed, None, Some(1)).await;
        store.insert_segments(&[segment(pending.id, 0)]).await.unwrap();

        let (_, done) = seed_episode(store.as_ref(), "has chunks").await;
        force_state(store.as_ref(), &done, ProcessingStatus::Transcribed, None, Some(1)).await;
        store.insert_segments(&[segment(done.id, 0)]).await.unwrap();
        store
            .insert_chunks(
                done.id,
                &[EmbeddingChunk {
                    episode_id: done.id,
                    chunk_index: 0,
                    start_ms: 0,
                    end_ms: 1000,
                    text: "hello".to_string(),
                    speaker_labels: None,
                    embedding: vec![1.0, 0.0],
                }],
            )
            .await
            .unwrap();

        reconciler.run_cycle().await.unwrap();
        assert_eq!(drain(&queue).await, vec![JobKind::IndexEpisode { episode_id: pending.id }]);
    }

    #[tokio::test]
    async fn test_healthy_episodes_are_untouched() {
        let (reconciler, store, queue) = fixture();
        let (_, episode) = seed_episode(store.as_ref(), "fine").await;
        force_state(store.as_ref(), &episode, ProcessingStatus::Downloaded, Some("/a.mp3".into()), Some(1)).await;

        let report = reconciler.run_cycle().await.unwrap();
        assert!(report.is_empty());
        assert!(drain(&queue).await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_from_transcript() {
        let (reconciler, store, queue) = fixture();
        let (_, episode) = seed_episode(store.as_ref(), "index failed").await;
        force_state(store.as_ref(), &episode, ProcessingStatus::Failed, None, Some(1)).await;
        store.insert_segments(&[segment(episode.id, 0)]).await.unwrap();

        let status = reconciler.retry_episode(episode.id).await.unwrap();
        assert_eq!(status, ProcessingStatus::Transcribed);
        assert_eq!(drain(&queue).await, vec![JobKind::IndexEpisode { episode_id: episode.id }]);
    }

    #[tokio::test]
    async fn test_retry_from_audio_on_disk() {
        let (reconciler, store, queue) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode_5.mp3");
        std::fs::write(&path, b"ID3").unwrap();

        let (_, episode) = seed_episode(store.as_ref(), "transcription failed").await;
        force_state(store.as_ref(), &episode, ProcessingStatus::Failed, Some(path.clone()), Some(1)).await;

        let status = reconciler.retry_episode(episode.id).await.unwrap();
        assert_eq!(status, ProcessingStatus::Downloaded);
        assert_eq!(
            drain(&queue).await,
            vec![JobKind::Transcribe {
                episode_id: episode.id,
                part_index: 0,
                audio_file_path: Some(path),
            }]
        );
    }

    #[tokio::test]
    async fn test_retry_without_artifacts_downloads_again() {
        let (reconciler, store, queue) = fixture();
        let (_, episode) = seed_episode(store.as_ref(), "download failed").await;
        force_state(store.as_ref(), &episode, ProcessingStatus::Failed, Some("/missing/x.mp3".into()), None).await;

        let status = reconciler.retry_episode(episode.id).await.unwrap();
        assert_eq!(status, ProcessingStatus::Discovered);
        assert_eq!(drain(&queue).await, vec![JobKind::DownloadAudio { episode_id: episode.id }]);
    }

    #[tokio::test]
    async fn test_retry_rejects_healthy_episode() {
        let (reconciler, store, _) = fixture();
        let (_, episode) = seed_episode(store.as_ref(), "not failed").await;

        let err = reconciler.retry_episode(episode.id).await.unwrap_err();
        assert!(matches!(err, HarkError::InvalidInput(_)));
        assert!(matches!(
            reconciler.retry_episode(9999).await.unwrap_err(),
            HarkError::NotFound(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_stops_on_cancel() {
        let (reconciler, store, queue) = fixture();
        let (_, episode) = seed_episode(store.as_ref(), "background").await;
        force_state(store.as_ref(), &episode, ProcessingStatus::Transcribing, None, None).await;

        let cancel = CancellationToken::new();
        let handle = Arc::new(reconciler).spawn(Duration::from_secs(60), cancel.clone());
        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(status(&store, episode.id).await, ProcessingStatus::Discovered);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(drain(&queue).await.len(), 1);
    }
}
