//! RSS/Atom feeds over HTTP, parsed with feed-rs.

use super::{FeedEntry, FeedSource, ParsedFeed};
use crate::error::{HarkError, Result};
use async_trait::async_trait;
use feed_rs::model::Entry;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub struct RssFeedSource {
    client: reqwest::Client,
}

impl RssFeedSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarkError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    #[instrument(skip(self))]
    async fn fetch(&self, feed_url: &str) -> Result<ParsedFeed> {
        let response = self
            .client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| HarkError::Feed(format!("Failed to fetch feed: {}", e)))?;

        if !response.status().is_success() {
            return Err(HarkError::Feed(format!(
                "Feed request returned {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| HarkError::Feed(format!("Failed to read feed body: {}", e)))?;

        let feed = parse_feed(&body)?;
        info!("Parsed {} audio entries from feed", feed.entries.len());
        Ok(feed)
    }
}

/// Parse feed XML. Entries without an audio enclosure are dropped.
pub fn parse_feed(body: &[u8]) -> Result<ParsedFeed> {
    let feed = feed_rs::parser::parse(body)
        .map_err(|e| HarkError::Feed(format!("Failed to parse feed: {}", e)))?;

    let total = feed.entries.len();
    let entries: Vec<FeedEntry> = feed.entries.into_iter().filter_map(to_entry).collect();
    debug!("Kept {} of {} entries", entries.len(), total);

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        description: feed.description.map(|t| t.content),
        author: feed.authors.first().map(|p| p.name.clone()),
        image_url: feed.logo.map(|i| i.uri).or_else(|| feed.icon.map(|i| i.uri)),
        entries,
    })
}

fn to_entry(entry: Entry) -> Option<FeedEntry> {
    // First enclosure wins, then any audio link.
    let audio_url = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
        .or_else(|| {
            entry
                .links
                .iter()
                .find(|l| {
                    l.media_type
                        .as_deref()
                        .is_some_and(|t| t.starts_with("audio/"))
                })
                .map(|l| l.href.clone())
        })?;

    let guid = Some(entry.id).filter(|id| !id.trim().is_empty());

    Some(FeedEntry {
        guid,
        title: entry.title.map(|t| t.content).unwrap_or_default(),
        description: entry.summary.map(|s| s.content),
        audio_url,
        published_at: entry.published,
    })
}
