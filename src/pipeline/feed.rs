//! Podcast registration and feed synchronisation.

use super::StageOutcome;
use crate::error::{HarkError, Result};
use crate::feed::{FeedEntry, FeedSource};
use crate::jobs::{Job, JobQueue};
use crate::store::{content_hash, NewEpisode, NewPodcast, Podcast, Store};
use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Result of a feed sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub discovered: usize,
    pub queued_downloads: usize,
}

/// Handles `SyncEpisodes` jobs and podcast registration.
pub struct FeedSync {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    feeds: Arc<dyn FeedSource>,
}

impl FeedSync {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>, feeds: Arc<dyn FeedSource>) -> Self {
        Self { store, queue, feeds }
    }

    /// Register a feed and queue its first sync.
    #[instrument(skip(self))]
    pub async fn add_podcast(&self, feed_url: &str, download_until: Option<NaiveDate>) -> Result<Podcast> {
        if self.store.find_podcast_by_feed_url(feed_url).await?.is_some() {
            return Err(HarkError::AlreadyExists(format!("Podcast feed {}", feed_url)));
        }

        let feed = self.feeds.fetch(feed_url).await?;
        let podcast = self
            .store
            .create_podcast(NewPodcast {
                feed_url: feed_url.to_string(),
                title: feed.title.unwrap_or_else(|| feed_url.to_string()),
                description: feed.description,
                image_url: feed.image_url,
                author: feed.author,
                download_until,
            })
            .await?;

        self.queue.enqueue(Job::sync_episodes(podcast.id)).await?;
        info!("Added podcast {} ({})", podcast.id, podcast.title);
        Ok(podcast)
    }

    /// Handle a `SyncEpisodes` job.
    #[instrument(skip(self))]
    pub async fn run(&self, podcast_id: i64) -> Result<StageOutcome> {
        let podcast = self
            .store
            .find_podcast(podcast_id)
            .await?
            .ok_or_else(|| HarkError::podcast_not_found(podcast_id))?;

        match self.sync(&podcast).await {
            Ok(report) => {
                info!(
                    "Synced podcast {}: {} new episodes, {} downloads queued",
                    podcast.id, report.discovered, report.queued_downloads
                );
                Ok(StageOutcome::Completed)
            }
            Err(e) => {
                error!("Feed sync for podcast {} failed: {}", podcast.id, e);
                Ok(StageOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Insert unseen feed entries and queue their downloads.
    pub async fn sync(&self, podcast: &Podcast) -> Result<SyncReport> {
        let feed = self.feeds.fetch(&podcast.feed_url).await?;

        let mut seen = HashSet::new();
        let mut new_episodes = Vec::new();
        for entry in feed.entries {
            let hash = content_hash(&entry.title, &entry.audio_url);
            let key = entry.guid.clone().unwrap_or_else(|| hash.clone());
            if !seen.insert(key) {
                continue;
            }
            if self.is_known(&entry, &hash).await? {
                continue;
            }
            new_episodes.push(NewEpisode {
                podcast_id: podcast.id,
                title: entry.title,
                description: entry.description,
                guid: entry.guid,
                content_hash: hash,
                audio_url: entry.audio_url,
                published_at: entry.published_at,
            });
        }

        let created = self.store.insert_episodes(&new_episodes).await?;

        let mut queued = 0;
        for episode in &created {
            if wants_download(podcast.download_until, episode.published_at.map(|d| d.date_naive())) {
                self.queue.enqueue(Job::download_audio(episode.id)).await?;
                queued += 1;
            }
        }

        self.store.mark_podcast_synced(podcast.id, Utc::now()).await?;

        Ok(SyncReport {
            discovered: created.len(),
            queued_downloads: queued,
        })
    }

    async fn is_known(&self, entry: &FeedEntry, hash: &str) -> Result<bool> {
        match &entry.guid {
            Some(guid) => self.store.episode_exists_by_guid(guid).await,
            None => self.store.episode_exists_by_content_hash(hash).await,
        }
    }
}

/// Episodes older than the podcast's cutoff are recorded but not fetched.
/// Undated episodes are always fetched.
fn wants_download(cutoff: Option<NaiveDate>, published: Option<NaiveDate>) -> bool {
    match (cutoff, published) {
        (Some(cutoff), Some(published)) => published >= cutoff,
        _ => true,
    }
}
