//! Hark - podcast ingestion and question answering
//!
//! Follows podcast RSS feeds, downloads and transcribes new episodes, indexes
//! the transcripts as embedded chunks and answers questions about them with
//! timestamped citations.
//!
//! # Architecture
//!
//! Work moves through a durable job queue. Each episode carries a processing
//! status that doubles as its lease:
//!
//! ```text
//! DISCOVERED -> DOWNLOADING -> DOWNLOADED -> TRANSCRIBING -> TRANSCRIBED -> INDEXING -> INDEXED
//! ```
//!
//! - `feed` - RSS fetching and parsing
//! - `audio` - Episode download, probing and splitting
//! - `transcription` - Speech-to-text providers
//! - `embedding` / `generation` - OpenAI-compatible model clients
//! - `store` - Podcasts, episodes, transcripts and chunks
//! - `jobs` - The durable job queue
//! - `pipeline` - Stage handlers and the status state machine
//! - `worker` - Concurrent job execution
//! - `qa` - Retrieval, answer generation and the answer cache
//! - `orchestrator` - Wires everything together
//!
//! # Example
//!
//! ```rust,no_run
//! use hark::config::Settings;
//! use hark::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let podcast = orchestrator
//!         .add_podcast("https://example.com/feed.xml", None)
//!         .await?;
//!     let running = orchestrator.start();
//!
//!     // ... once episodes are indexed
//!     let answer = orchestrator.ask(podcast.id, "What was the first topic?").await?;
//!     println!("{}", answer.answer);
//!
//!     running.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod feed;
pub mod generation;
pub mod jobs;
pub mod openai;
pub mod orchestrator;
pub mod pipeline;
pub mod qa;
pub mod store;
pub mod transcription;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{HarkError, Result};
