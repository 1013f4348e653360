//! Reconcile and retry commands.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run a single reconciliation pass and report what it repaired.
pub async fn run_reconcile(settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let report = orchestrator.reconcile().await?;

    if report.is_empty() {
        Output::success("Nothing to reconcile.");
        return Ok(());
    }

    Output::header("Reconciled");
    Output::kv("Marked transcribed", &report.marked_transcribed.to_string());
    Output::kv("Requeued downloads", &report.requeued_downloads.to_string());
    Output::kv("Requeued transcriptions", &report.requeued_transcriptions.to_string());
    Output::kv("Requeued indexing", &report.requeued_indexes.to_string());
    Ok(())
}

/// Put a failed episode back into the pipeline.
pub async fn run_retry(episode_id: i64, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let status = orchestrator.retry_episode(episode_id).await?;
    Output::success(&format!("Episode {} resumes from {}", episode_id, status));
    Ok(())
}
