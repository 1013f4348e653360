//! Configuration settings for Hark.

use crate::error::{HarkError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bounds on the answer cache TTL, in minutes.
pub const MIN_CACHE_TTL_MINUTES: u64 = 1;
pub const MAX_CACHE_TTL_MINUTES: u64 = 1440;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub storage: StorageSettings,
    pub audio: AudioSettings,
    pub transcription: TranscriptionSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub qa: QaSettings,
    pub jobs: JobSettings,
    pub reconcile: ReconcileSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.hark".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Storage backend for entities and the job queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Sqlite,
    /// Everything lives in process memory. Useful for demos and tests.
    Memory,
}

impl std::fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageProvider::Sqlite => write!(f, "sqlite"),
            StorageProvider::Memory => write!(f, "memory"),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Storage provider (sqlite, memory).
    pub provider: StorageProvider,
    /// Path to the SQLite database holding podcasts, episodes, transcripts and jobs.
    pub sqlite_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Sqlite,
            sqlite_path: "~/.hark/hark.db".to_string(),
        }
    }
}

/// Audio download and splitting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Directory where episode audio is stored.
    pub storage_path: String,
    /// Audio longer than this is split into parts before transcription.
    pub max_minutes_before_split: u32,
    /// Connect timeout for audio downloads.
    pub connect_timeout_secs: u64,
    /// Overall timeout for a single audio download.
    pub download_timeout_secs: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            storage_path: "~/.hark/audio".to_string(),
            max_minutes_before_split: 60,
            connect_timeout_secs: 30,
            download_timeout_secs: 1800,
        }
    }
}

/// Transcription provider type.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionProvider {
    /// Self-hosted Whisper HTTP service (`POST /transcribe`).
    #[default]
    Service,
    /// OpenAI audio transcription API.
    OpenAI,
}

impl std::str::FromStr for TranscriptionProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "service" | "whisper" => Ok(TranscriptionProvider::Service),
            "openai" => Ok(TranscriptionProvider::OpenAI),
            _ => Err(format!("Unknown transcription provider: {}", s)),
        }
    }
}

impl std::fmt::Display for TranscriptionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptionProvider::Service => write!(f, "service"),
            TranscriptionProvider::OpenAI => write!(f, "openai"),
        }
    }
}

/// Transcription service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Transcription provider (service, openai).
    pub provider: TranscriptionProvider,
    /// Base URL of the Whisper service (service provider).
    pub service_url: String,
    /// Whisper model to use (openai provider).
    pub model: String,
    /// Request timeout. Long episodes take a while.
    pub timeout_secs: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            provider: TranscriptionProvider::Service,
            service_url: "http://localhost:8000".to_string(),
            model: "whisper-1".to_string(),
            timeout_secs: 3600,
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// OpenAI-compatible API base. `None` means api.openai.com.
    pub api_base: Option<String>,
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            api_base: Some("http://localhost:11434/v1".to_string()),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
        }
    }
}

/// Answer generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// OpenAI-compatible API base. `None` means api.openai.com.
    pub api_base: Option<String>,
    /// Chat model used to answer questions.
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_base: Some("http://localhost:11434/v1".to_string()),
            model: "llama3".to_string(),
            temperature: 0.2,
            timeout_secs: 300,
        }
    }
}

/// Question answering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaSettings {
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// How long a cached answer stays valid (1 to 1440 minutes).
    pub cache_ttl_minutes: u64,
}

impl Default for QaSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            cache_ttl_minutes: 60,
        }
    }
}

/// Worker pool and queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Number of concurrent workers.
    pub parallelism: usize,
    /// Sleep after an empty dequeue.
    pub poll_delay_ms: u64,
    /// How long a single dequeue blocks waiting for work.
    pub dequeue_timeout_secs: u64,
    /// Default number of queued jobs shown in status reports.
    pub status_limit: usize,
    /// How long shutdown waits for running jobs before aborting them.
    pub shutdown_grace_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            parallelism: 1,
            poll_delay_ms: 1000,
            dequeue_timeout_secs: 5,
            status_limit: 50,
            shutdown_grace_secs: 10,
        }
    }
}

impl JobSettings {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// Run the periodic repair loop alongside the workers.
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let ttl = self.qa.cache_ttl_minutes;
        if !(MIN_CACHE_TTL_MINUTES..=MAX_CACHE_TTL_MINUTES).contains(&ttl) {
            return Err(HarkError::Config(format!(
                "qa.cache_ttl_minutes must be between {} and {}, got {}",
                MIN_CACHE_TTL_MINUTES, MAX_CACHE_TTL_MINUTES, ttl
            )));
        }
        if self.qa.top_k == 0 {
            return Err(HarkError::Config("qa.top_k must be at least 1".to_string()));
        }
        if self.jobs.parallelism == 0 {
            return Err(HarkError::Config(
                "jobs.parallelism must be at least 1".to_string(),
            ));
        }
        if self.audio.max_minutes_before_split == 0 {
            return Err(HarkError::Config(
                "audio.max_minutes_before_split must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| HarkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hark")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded audio storage directory.
    pub fn audio_dir(&self) -> PathBuf {
        Self::expand_path(&self.audio.storage_path)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.storage.sqlite_path)
    }

    /// Split ceiling in seconds.
    pub fn max_seconds_before_split(&self) -> f64 {
        f64::from(self.audio.max_minutes_before_split) * 60.0
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.qa.cache_ttl_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.audio.max_minutes_before_split, 60);
        assert_eq!(settings.qa.top_k, 5);
        assert_eq!(settings.jobs.parallelism, 1);
        assert_eq!(settings.jobs.status_limit, 50);
        assert_eq!(settings.embedding.dimensions, 768);
    }

    #[test]
    fn test_cache_ttl_bounds() {
        let mut settings = Settings::default();
        settings.qa.cache_ttl_minutes = 0;
        assert!(settings.validate().is_err());
        settings.qa.cache_ttl_minutes = 1441;
        assert!(settings.validate().is_err());
        settings.qa.cache_ttl_minutes = 1440;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [jobs]
            parallelism = 4

            [transcription]
            provider = "openai"
            "#,
        )
        .unwrap();

        assert_eq!(settings.jobs.parallelism, 4);
        assert_eq!(settings.jobs.poll_delay_ms, 1000);
        assert_eq!(settings.transcription.provider, TranscriptionProvider::OpenAI);
        assert_eq!(settings.storage.provider, StorageProvider::Sqlite);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[qa]\ntop_k = 8\ncache_ttl_minutes = 5\n").unwrap();

        let settings = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(settings.qa.top_k, 8);
        assert_eq!(settings.cache_ttl(), Duration::from_secs(300));
    }
}
