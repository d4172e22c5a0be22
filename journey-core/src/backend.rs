//! Text-generation backends.
//!
//! The generator only needs "prompt in, text out"; [`TextBackend`] is that
//! seam. [`GeminiBackend`] is the production implementation, and the
//! [`testing`](crate::testing) module provides scripted ones.

use crate::config::SimulationConfig;
use async_trait::async_trait;
use gemini::{Gemini, Request};
use thiserror::Error;

/// Errors reported by a backend for a single attempt.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Gemini API error: {0}")]
    Gemini(#[from] gemini::Error),

    #[error("{0}")]
    Failed(String),
}

/// Produces one piece of text for one composed prompt.
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Run a single generation attempt.
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;

    /// Name used in logs and failure text.
    fn name(&self) -> &str;
}

/// Backend calling Google Gemini.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: Gemini,
    temperature: Option<f32>,
}

impl GeminiBackend {
    pub fn new(client: Gemini) -> Self {
        Self {
            client,
            temperature: None,
        }
    }

    /// Build from configuration, or `None` when no credential is configured.
    pub fn from_config(config: &SimulationConfig) -> Option<Self> {
        let key = config.api_key.as_deref().filter(|k| gemini::is_usable_key(k))?;
        let client = Gemini::new(key).with_model(config.model.clone());
        Some(Self::new(client))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl TextBackend for GeminiBackend {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let mut request = Request::new(prompt);
        if let Some(temp) = self.temperature {
            request = request.with_temperature(temp);
        }

        let response = self.client.complete(request).await?;
        tracing::debug!(
            model = %response.model,
            finish_reason = ?response.finish_reason,
            prompt_tokens = response.usage.prompt_tokens,
            output_tokens = response.usage.output_tokens,
            "Gemini response"
        );
        Ok(response.text())
    }

    fn name(&self) -> &str {
        "Gemini API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_key_means_no_backend() {
        let config = SimulationConfig::new("out.json");
        assert!(GeminiBackend::from_config(&config).is_none());

        let config = SimulationConfig::new("out.json").with_api_key(gemini::PLACEHOLDER_KEY);
        assert!(GeminiBackend::from_config(&config).is_none());
    }

    #[test]
    fn test_backend_uses_configured_model() {
        let config = SimulationConfig::new("out.json")
            .with_api_key("k")
            .with_model("gemini-2.0-flash");
        let backend = GeminiBackend::from_config(&config).unwrap();
        assert_eq!(backend.client.model(), "gemini-2.0-flash");
        assert_eq!(backend.name(), "Gemini API");
    }
}
