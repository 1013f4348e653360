//! Configuration module for Hark.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{Prompts, QaPrompts};
pub use settings::{
    AudioSettings, EmbeddingSettings, GeneralSettings, GenerationSettings, JobSettings,
    PromptSettings, QaSettings, ReconcileSettings, Settings, StorageProvider, StorageSettings,
    TranscriptionProvider, TranscriptionSettings, MAX_CACHE_TTL_MINUTES, MIN_CACHE_TTL_MINUTES,
};
