//! Embeddings over an OpenAI-compatible API.

use super::Embedder;
use crate::config::EmbeddingSettings;
use crate::error::{HarkError, Result};
use crate::openai::{create_client_for, DEFAULT_TIMEOUT_SECS};
use async_openai::config::OpenAIConfig;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// Embedder backed by `/embeddings` on OpenAI or a compatible server.
pub struct OpenAIEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
    /// Only api.openai.com accepts the `dimensions` request field.
    send_dimensions: bool,
}

impl OpenAIEmbedder {
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        Ok(Self {
            client: create_client_for(
                settings.api_base.as_deref(),
                Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            )?,
            model: settings.model.clone(),
            dimensions: settings.dimensions as usize,
            send_dimensions: settings.api_base.is_none(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    #[instrument(skip(self, text), fields(chars = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut args = CreateEmbeddingRequestArgs::default();
        args.model(&self.model)
            .input(EmbeddingInput::String(text.to_string()));
        if self.send_dimensions {
            args.dimensions(self.dimensions as u32);
        }
        let request = args
            .build()
            .map_err(|e| HarkError::Embedding(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| HarkError::OpenAI(format!("Embedding API error: {}", e)))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| HarkError::Embedding("Empty embedding response".to_string()))?;

        if embedding.len() != self.dimensions {
            return Err(HarkError::Embedding(format!(
                "Expected {} dimensions from {}, got {}",
                self.dimensions,
                self.model,
                embedding.len()
            )));
        }

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_from_settings() {
        let embedder = OpenAIEmbedder::from_settings(&EmbeddingSettings::default()).unwrap();
        assert_eq!(embedder.dimensions(), 768);
        assert!(!embedder.send_dimensions);

        let openai = EmbeddingSettings {
            api_base: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        };
        let embedder = OpenAIEmbedder::from_settings(&openai).unwrap();
        assert_eq!(embedder.dimensions(), 1536);
        assert!(embedder.send_dimensions);
    }
}
