//! `DownloadAudio`: fetch the enclosure, probe it, split long audio.

use super::status::transition;
use super::{ProcessingStatus, StageOutcome};
use crate::audio::{episode_audio_path, remove_audio_files, AudioFetcher, AudioTools};
use crate::error::{HarkError, Result};
use crate::jobs::{Job, JobQueue};
use crate::store::{Episode, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Downloaded audio ready for transcription.
struct PreparedAudio {
    path: PathBuf,
    duration_seconds: Option<f64>,
    /// One entry per transcription job, in order.
    parts: Vec<PathBuf>,
}

pub struct AudioStage {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    fetcher: Arc<dyn AudioFetcher>,
    tools: Arc<dyn AudioTools>,
    audio_dir: PathBuf,
    max_seconds_before_split: f64,
}

impl AudioStage {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        fetcher: Arc<dyn AudioFetcher>,
        tools: Arc<dyn AudioTools>,
        audio_dir: PathBuf,
        max_seconds_before_split: f64,
    ) -> Self {
        Self {
            store,
            queue,
            fetcher,
            tools,
            audio_dir,
            max_seconds_before_split,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, episode_id: i64) -> Result<StageOutcome> {
        let episode = self
            .store
            .find_episode(episode_id)
            .await?
            .ok_or_else(|| HarkError::episode_not_found(episode_id))?;

        if episode.status != ProcessingStatus::Discovered {
            info!("Episode {} is {}, nothing to download", episode.id, episode.status);
            return Ok(StageOutcome::skipped(format!("status is {}", episode.status)));
        }

        if !transition(
            self.store.as_ref(),
            episode.id,
            ProcessingStatus::Discovered,
            ProcessingStatus::Downloading,
        )
        .await?
        {
            return Ok(StageOutcome::skipped("claimed by another worker"));
        }

        let dest = episode_audio_path(&self.audio_dir, episode.id, &episode.audio_url);
        let prepared = match self.prepare(&episode, &dest).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Audio for episode {} failed: {}", episode.id, e);
                remove_audio_files(&dest).await;
                transition(
                    self.store.as_ref(),
                    episode.id,
                    ProcessingStatus::Downloading,
                    ProcessingStatus::Failed,
                )
                .await?;
                return Ok(StageOutcome::Failed(e.to_string()));
            }
        };

        let mut downloaded = episode.clone();
        downloaded.audio_file_path = Some(prepared.path.clone());
        downloaded.duration_seconds = prepared.duration_seconds.map(|d| d.round() as u32);
        downloaded.expected_parts = Some(prepared.parts.len() as u32);
        downloaded.status = ProcessingStatus::Downloaded;

        if !self
            .store
            .update_episode_if_status(&downloaded, ProcessingStatus::Downloading)
            .await?
        {
            warn!("Episode {} changed while downloading, leaving it alone", episode.id);
            return Ok(StageOutcome::skipped("status changed during download"));
        }

        for (index, part) in prepared.parts.iter().enumerate() {
            let job = Job::transcribe(episode.id, index as u32, Some(part.clone()));
            if let Err(e) = self.queue.enqueue(job).await {
                // Reconciliation never scans DOWNLOADED, so park the episode
                // where a retry will pick it up. The audio stays on disk.
                error!("Could not queue transcription of episode {} part {}: {}", episode.id, index, e);
                transition(
                    self.store.as_ref(),
                    episode.id,
                    ProcessingStatus::Downloaded,
                    ProcessingStatus::Failed,
                )
                .await?;
                return Ok(StageOutcome::Failed(e.to_string()));
            }
        }

        info!(
            "Downloaded episode {} ({} part(s))",
            episode.id,
            prepared.parts.len()
        );
        Ok(StageOutcome::Completed)
    }

    async fn prepare(&self, episode: &Episode, dest: &Path) -> Result<PreparedAudio> {
        self.fetcher.fetch(&episode.audio_url, dest).await?;

        // An unreadable duration means we cannot tell if it is too long,
        // so the file is transcribed whole.
        let duration = match self.tools.probe_duration(dest).await {
            Ok(duration) => Some(duration),
            Err(e) => {
                warn!("Could not probe {}: {}", dest.display(), e);
                None
            }
        };

        let parts = match duration {
            Some(total) if total > self.max_seconds_before_split => {
                self.tools
                    .split(dest, total, self.max_seconds_before_split)
                    .await?
            }
            _ => vec![dest.to_path_buf()],
        };

        Ok(PreparedAudio {
            path: dest.to_path_buf(),
            duration_seconds: duration,
            parts,
        })
    }
}
