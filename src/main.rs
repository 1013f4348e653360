//! Hark CLI entry point.

use anyhow::Result;
use clap::Parser;
use hark::cli::{commands, Cli, Commands};
use hark::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.as_deref();
    let settings = match config_path {
        Some(path) => Settings::load_from(Some(&Settings::expand_path(path)))?,
        None => Settings::load()?,
    };

    // -v flags override the configured level
    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("hark={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.audio_dir())?;

    match cli.command {
        Commands::Serve { host, port } => commands::run_serve(&host, port, settings).await?,
        Commands::Worker => commands::run_worker(settings).await?,
        Commands::Add {
            feed_url,
            download_until,
        } => commands::run_add(&feed_url, download_until, settings).await?,
        Commands::Sync { podcast_id } => commands::run_sync(podcast_id, settings).await?,
        Commands::Ask {
            podcast_id,
            question,
        } => commands::run_ask(podcast_id, &question, settings).await?,
        Commands::List { podcast_id } => commands::run_list(podcast_id, settings).await?,
        Commands::Status { limit, json } => commands::run_status(limit, json, settings).await?,
        Commands::Reconcile => commands::run_reconcile(settings).await?,
        Commands::Retry { episode_id } => commands::run_retry(episode_id, settings).await?,
        Commands::Doctor => commands::run_doctor(config_path, &settings).await?,
        Commands::Config { action } => commands::run_config(&action, config_path, settings)?,
    }

    Ok(())
}
