//! Status command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::jobs::{Job, JobKind};
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Show the queue. Active jobs belong to whichever process runs the
/// workers, so from here only the queued backlog is visible.
pub async fn run_status(limit: Option<usize>, json: bool, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let status = orchestrator.status(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    Output::header("Job Queue");
    Output::kv("Queued", &status.queue_size.to_string());
    Output::kv("Workers", &status.parallelism.to_string());
    println!();

    if status.queued_jobs.is_empty() {
        Output::info("Queue is empty.");
    }
    for job in &status.queued_jobs {
        Output::list_item(&describe(job));
    }
    if status.queue_size > status.queued_jobs.len() {
        Output::info(&format!(
            "... and {} more",
            status.queue_size - status.queued_jobs.len()
        ));
    }

    Ok(())
}

fn describe(job: &Job) -> String {
    let target = match &job.kind {
        JobKind::SyncEpisodes { podcast_id } => format!("podcast {}", podcast_id),
        JobKind::Transcribe {
            episode_id,
            part_index,
            ..
        } => format!("episode {} part {}", episode_id, part_index),
        JobKind::DownloadAudio { episode_id } | JobKind::IndexEpisode { episode_id } => {
            format!("episode {}", episode_id)
        }
    };
    format!("{} {}", job.job_type(), target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(describe(&Job::sync_episodes(4)), "SYNC_EPISODES podcast 4");
        assert_eq!(
            describe(&Job::transcribe(9, 2, None)),
            "TRANSCRIBE episode 9 part 2"
        );
        assert_eq!(describe(&Job::index_episode(9)), "INDEX_EPISODE episode 9");
    }
}
