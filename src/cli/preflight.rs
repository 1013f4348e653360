//! Pre-flight checks before starting long-running processes.
//!
//! Validates that required tools and credentials are available so workers
//! do not fail every job for the same missing dependency.

use crate::config::{Settings, TranscriptionProvider};
use crate::error::{HarkError, Result};
use std::process::Command;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Running the pipeline needs the audio tools and any hosted API keys.
    Process,
    /// Answering questions needs the embedding and generation endpoints.
    Ask,
    /// Reading state needs nothing external.
    Inspect,
}

/// Run pre-flight checks for the given operation.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Process => {
            check_tool("ffmpeg")?;
            check_tool("ffprobe")?;
            if needs_api_key(settings, true) {
                check_api_key()?;
            }
        }
        Operation::Ask => {
            if needs_api_key(settings, false) {
                check_api_key()?;
            }
        }
        Operation::Inspect => {}
    }
    Ok(())
}

/// Hosted OpenAI is used for anything without a custom `api_base`.
pub fn needs_api_key(settings: &Settings, include_transcription: bool) -> bool {
    settings.embedding.api_base.is_none()
        || settings.generation.api_base.is_none()
        || (include_transcription && settings.transcription.provider == TranscriptionProvider::OpenAI)
}

/// Check if OpenAI API key is configured.
fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(HarkError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(HarkError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

/// Check if an external tool is available.
fn check_tool(name: &str) -> Result<()> {
    match Command::new(name).arg("-version").output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(HarkError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(HarkError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(HarkError::ToolNotFound(format!("{}: {}", name, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_has_no_requirements() {
        assert!(check(Operation::Inspect, &Settings::default()).is_ok());
    }

    #[test]
    fn test_local_endpoints_need_no_key() {
        let mut settings = Settings::default();
        settings.generation.api_base = Some("http://localhost:11434/v1".to_string());
        settings.transcription.provider = TranscriptionProvider::Service;
        assert!(!needs_api_key(&settings, true));

        settings.transcription.provider = TranscriptionProvider::OpenAI;
        assert!(needs_api_key(&settings, true));
        assert!(!needs_api_key(&settings, false));
    }
}
