//! Podcast feed retrieval.

mod rss;

pub use rss::{parse_feed, RssFeedSource};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Channel-level metadata plus the entries that carry audio.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// A feed item with an audio enclosure.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub guid: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub audio_url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Fetches and parses a feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, feed_url: &str) -> Result<ParsedFeed>;
}
