//! Add and sync commands.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use chrono::NaiveDate;

/// Follow a new feed. Episodes arrive once a worker runs the queued sync.
pub async fn run_add(feed_url: &str, download_until: Option<NaiveDate>, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let podcast = orchestrator.add_podcast(feed_url, download_until).await?;

    Output::success(&format!("Added \"{}\" as podcast {}", podcast.title, podcast.id));
    if let Some(cutoff) = podcast.download_until {
        Output::kv("Downloads from", &cutoff.to_string());
    }
    Output::info("A feed sync has been queued. Run 'hark worker' or 'hark serve' to process it.");
    Ok(())
}

/// Queue a feed refresh.
pub async fn run_sync(podcast_id: i64, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let job_id = orchestrator.sync_podcast(podcast_id).await?;
    Output::success(&format!("Queued sync for podcast {} (job {})", podcast_id, job_id));
    Ok(())
}
