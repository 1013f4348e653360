//! OpenAI Whisper transcription implementation.

use super::{RawSegment, RawTranscript, Transcriber};
use crate::config::TranscriptionSettings;
use crate::error::{HarkError, Result};
use crate::openai::create_client_for;
use async_openai::config::OpenAIConfig;
use async_openai::types::{AudioInput, AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

/// Transcriber backed by the OpenAI audio API.
pub struct OpenAITranscriber {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAITranscriber {
    pub fn from_settings(settings: &TranscriptionSettings) -> Result<Self> {
        Ok(Self {
            client: create_client_for(None, Duration::from_secs(settings.timeout_secs))?,
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for OpenAITranscriber {
    #[instrument(skip(self), fields(audio_path = %audio_path.display()))]
    async fn transcribe(&self, audio_path: &Path) -> Result<RawTranscript> {
        let file_bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8(file_name, file_bytes))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson)
            .build()
            .map_err(|e| HarkError::Transcription(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe_verbose_json(request)
            .await
            .map_err(|e| HarkError::OpenAI(format!("Whisper API error: {}", e)))?;

        let segments = response
            .segments
            .unwrap_or_default()
            .into_iter()
            .map(|s| RawSegment::new(s.id as u32, s.start as f64, s.end as f64, s.text))
            .collect::<Vec<_>>();

        debug!("Transcribed {} segments", segments.len());
        Ok(RawTranscript {
            text: response.text,
            segments,
        }
        .with_fallback_segment(response.duration as f64))
    }
}
