//! Worker command: process queued jobs until interrupted.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

pub async fn run_worker(settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Process, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'hark doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(settings)?;
    let running = orchestrator.start();

    Output::success(&format!(
        "Processing jobs with {} worker(s). Press Ctrl+C to stop.",
        orchestrator.settings().jobs.parallelism
    ));

    tokio::signal::ctrl_c().await?;
    Output::info("Shutting down workers...");
    running.shutdown().await;
    Output::success("Stopped.");
    Ok(())
}
