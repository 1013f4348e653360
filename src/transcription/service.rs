//! Client for a self-hosted Whisper HTTP service.
//!
//! The service accepts `POST {base}/transcribe` with a multipart `file` field
//! and `response_format=verbose_json`, and answers with `{text, segments}`.

use super::{RawTranscript, Transcriber};
use crate::config::TranscriptionSettings;
use crate::error::{HarkError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct WhisperServiceTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

impl WhisperServiceTranscriber {
    pub fn from_settings(settings: &TranscriptionSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: transcribe_endpoint(&settings.service_url),
        })
    }
}

fn transcribe_endpoint(base: &str) -> String {
    format!("{}/transcribe", base.trim_end_matches('/'))
}

#[async_trait]
impl Transcriber for WhisperServiceTranscriber {
    #[instrument(skip(self), fields(audio_path = %audio_path.display()))]
    async fn transcribe(&self, audio_path: &Path) -> Result<RawTranscript> {
        let file_bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let form = Form::new()
            .part("file", Part::bytes(file_bytes).file_name(file_name))
            .text("response_format", "verbose_json");

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| HarkError::Transcription(format!("Request to {} failed: {}", self.endpoint, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HarkError::Transcription(format!(
                "Whisper service returned {}: {}",
                status, body
            )));
        }

        let transcript: RawTranscript = response
            .json()
            .await
            .map_err(|e| HarkError::Transcription(format!("Invalid response body: {}", e)))?;

        let end = transcript.segments.last().map(|s| s.end).unwrap_or(0.0);
        debug!("Transcribed {} segments", transcript.segments.len());
        Ok(transcript.with_fallback_segment(end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcribe_endpoint() {
        assert_eq!(transcribe_endpoint("http://localhost:8000"), "http://localhost:8000/transcribe");
        assert_eq!(transcribe_endpoint("http://whisper:9000/"), "http://whisper:9000/transcribe");
    }
}
