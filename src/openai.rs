//! OpenAI-compatible client configuration.
//!
//! The same client talks to api.openai.com or to any server exposing the
//! OpenAI wire format (Ollama serves it under `/v1`).

use crate::error::{HarkError, Result};
use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Default timeout for API requests (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Placeholder key for local servers that ignore authentication.
const LOCAL_API_KEY: &str = "ollama";

/// Create a client against api.openai.com with the default timeout.
pub fn create_client() -> Result<Client<OpenAIConfig>> {
    create_client_for(None, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

/// Create a client with a custom API base and timeout.
///
/// The key is read from `OPENAI_API_KEY`. A custom base without a key in the
/// environment gets a placeholder, since local servers do not check it.
pub fn create_client_for(api_base: Option<&str>, timeout: Duration) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| HarkError::Config(format!("Failed to create HTTP client: {}", e)))?;

    let mut config = OpenAIConfig::default();
    if let Some(base) = api_base {
        config = config.with_api_base(base.trim_end_matches('/'));
        if std::env::var("OPENAI_API_KEY").is_err() {
            config = config.with_api_key(LOCAL_API_KEY);
        }
    }

    Ok(Client::with_config(config).with_http_client(http_client))
}
