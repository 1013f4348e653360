//! Data models for transcription output.

use serde::{Deserialize, Serialize};

/// A segment as returned by a transcription backend, in seconds from the
/// start of the transcribed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    #[serde(default)]
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Diarization label, when the backend provides one.
    #[serde(default)]
    pub speaker: Option<String>,
}

impl RawSegment {
    pub fn new(id: u32, start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            id,
            start,
            end,
            text: text.into(),
            speaker: None,
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }
}

/// Full transcription output for one audio file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTranscript {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub segments: Vec<RawSegment>,
}

impl RawTranscript {
    /// Ensure there is at least one segment: a response carrying only
    /// full text becomes a single segment spanning `duration` seconds.
    pub fn with_fallback_segment(mut self, duration: f64) -> Self {
        if self.segments.is_empty() && !self.text.trim().is_empty() {
            self.segments
                .push(RawSegment::new(0, 0.0, duration, self.text.trim()));
        }
        self
    }
}
