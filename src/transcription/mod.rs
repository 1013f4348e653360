//! Transcription module for Hark.
//!
//! Two interchangeable backends produce the same raw, part-relative segments:
//!
//! - **Service** (default): a self-hosted Whisper HTTP service.
//! - **OpenAI**: the OpenAI audio transcription API in `verbose_json` mode.

mod models;
mod service;
mod whisper;

pub use models::{RawSegment, RawTranscript};
pub use service::WhisperServiceTranscriber;
pub use whisper::OpenAITranscriber;

use crate::config::{TranscriptionProvider, TranscriptionSettings};
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Trait for transcription services.
///
/// Timestamps in the returned transcript are relative to the start of the
/// given file; placing them on the episode timeline is the caller's job.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<RawTranscript>;
}

/// Build the configured transcriber.
pub fn create_transcriber(settings: &TranscriptionSettings) -> Result<Arc<dyn Transcriber>> {
    Ok(match settings.provider {
        TranscriptionProvider::Service => Arc::new(WhisperServiceTranscriber::from_settings(settings)?),
        TranscriptionProvider::OpenAI => Arc::new(OpenAITranscriber::from_settings(settings)?),
    })
}
