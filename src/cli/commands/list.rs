//! List command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::pipeline::ProcessingStatus;
use anyhow::Result;
use std::collections::BTreeMap;

/// List followed podcasts, or one podcast's episodes.
pub async fn run_list(podcast_id: Option<i64>, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;

    let Some(podcast_id) = podcast_id else {
        let podcasts = orchestrator.list_podcasts().await?;
        if podcasts.is_empty() {
            Output::info("No podcasts yet. Use 'hark add <feed-url>' to follow one.");
            return Ok(());
        }

        Output::header(&format!("Podcasts ({})", podcasts.len()));
        println!();
        for podcast in &podcasts {
            let synced = podcast
                .last_synced_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            Output::list_item(&format!(
                "[{}] {} (last synced {})",
                podcast.id, podcast.title, synced
            ));
        }
        return Ok(());
    };

    let (podcast, episodes) = orchestrator.podcast(podcast_id).await?;
    Output::header(&podcast.title);
    Output::kv("Feed", &podcast.feed_url);
    if let Some(cutoff) = podcast.download_until {
        Output::kv("Downloads from", &cutoff.to_string());
    }
    println!();

    if episodes.is_empty() {
        Output::info(&format!(
            "No episodes yet. Run 'hark sync {}' to refresh the feed.",
            podcast.id
        ));
        return Ok(());
    }

    for episode in &episodes {
        Output::episode(episode.id, &episode.title, episode.status, episode.duration_seconds);
    }

    println!();
    for (status, count) in status_counts(episodes.iter().map(|e| e.status)) {
        Output::kv(&status, &count.to_string());
    }

    Ok(())
}

fn status_counts(statuses: impl Iterator<Item = ProcessingStatus>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for status in statuses {
        *counts.entry(status.to_string()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_counts() {
        let counts = status_counts(
            [
                ProcessingStatus::Indexed,
                ProcessingStatus::Failed,
                ProcessingStatus::Indexed,
            ]
            .into_iter(),
        );
        assert_eq!(counts.get(&ProcessingStatus::Indexed.to_string()), Some(&2));
        assert_eq!(counts.get(&ProcessingStatus::Failed.to_string()), Some(&1));
        assert_eq!(counts.len(), 2);
    }
}
