//! CLI module for Hark.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Hark - podcast ingestion and question answering
///
/// Follows podcast feeds, downloads and transcribes new episodes, indexes the
/// transcripts and answers questions about what was said.
#[derive(Parser, Debug)]
#[command(name = "hark")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "HARK_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API together with the workers and reconciler
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Process queued jobs until interrupted
    Worker,

    /// Follow a podcast feed
    Add {
        /// RSS feed URL
        feed_url: String,

        /// Only download episodes published on or after this date (YYYY-MM-DD)
        #[arg(long)]
        download_until: Option<NaiveDate>,
    },

    /// Queue a feed refresh for a podcast
    Sync {
        podcast_id: i64,
    },

    /// Ask a question about a podcast's episodes
    Ask {
        podcast_id: i64,

        /// The question to ask
        question: String,
    },

    /// List podcasts, or the episodes of one podcast
    List {
        podcast_id: Option<i64>,
    },

    /// Show queue and worker state
    Status {
        /// Number of queued jobs to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one reconciliation pass now
    Reconcile,

    /// Requeue a failed episode
    Retry {
        episode_id: i64,
    },

    /// Check system requirements and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the current configuration to the config file
    Init,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add_with_cutoff() {
        let cli = Cli::try_parse_from([
            "hark",
            "-vv",
            "add",
            "https://example.com/feed.xml",
            "--download-until",
            "2024-03-01",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Add { feed_url, download_until } => {
                assert_eq!(feed_url, "https://example.com/feed.xml");
                assert_eq!(download_until, NaiveDate::from_ymd_opt(2024, 3, 1));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from(["hark", "ask", "3", "What was said about ferries?"]).unwrap();
        assert!(matches!(cli.command, Commands::Ask { podcast_id: 3, .. }));
    }
}
