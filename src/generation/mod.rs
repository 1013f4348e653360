//! Answer generation from a rendered prompt.

mod openai;

pub use openai::OpenAIGenerator;

use crate::error::Result;
use async_trait::async_trait;

/// Trait for text generation backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for `prompt`, optionally steered by a system message.
    async fn generate(&self, system: Option<&str>, prompt: &str) -> Result<String>;
}
