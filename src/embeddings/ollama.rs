//! Ollama embedding provider.
//!
//! Local fallback provider backed by an Ollama server.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

use super::config::EmbedderConfig;
use super::gemini::truncate_chars;
use super::provider::EmbeddingProvider;
use super::types::{ProviderInfo, TaskType, ollama_models};

/// Ollama embedding provider.
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    max_chars: usize,
}

impl OllamaProvider {
    /// Create a provider from resolved configuration.
    #[must_use]
    pub fn from_config(config: &EmbedderConfig) -> Self {
        Self::with_config(&config.ollama_endpoint, &config.ollama_model)
    }

    /// Create a provider for an explicit endpoint and model.
    #[must_use]
    pub fn with_config(endpoint: &str, model: &str) -> Self {
        let config = ollama_models::get_config(model);

        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions: config.dimensions,
            max_chars: config.max_chars,
        }
    }

    /// Apply the task prefix that nomic models are trained with.
    fn prepare<'a>(&self, text: &'a str, task: TaskType) -> std::borrow::Cow<'a, str> {
        if self.model.starts_with("nomic-embed-text") {
            let prefix = match task {
                TaskType::Document => "search_document: ",
                TaskType::Query => "search_query: ",
            };
            std::borrow::Cow::Owned(format!("{prefix}{text}"))
        } else {
            std::borrow::Cow::Borrowed(text)
        }
    }
}

/// Ollama API response for listing models.
#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Option<Vec<OllamaModel>>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

/// Ollama API request for embedding.
#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Ollama API response for embedding.
#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingProvider for OllamaProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "ollama".to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
            max_chars: self.max_chars,
            available: false, // Checked by is_available()
        }
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint);

        let Ok(response) = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(2))
            .send()
            .await
        else {
            return false;
        };

        if !response.status().is_success() {
            return false;
        }

        let Ok(data) = response.json::<OllamaTagsResponse>().await else {
            return false;
        };

        data.models.is_some_and(|models| {
            models
                .iter()
                .any(|m| m.name == self.model || m.name.starts_with(&format!("{}:", self.model)))
        })
    }

    async fn generate_embedding(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.endpoint);
        let input = self.prepare(truncate_chars(text, self.max_chars), task);

        let request = OllamaEmbedRequest {
            model: &self.model,
            input: &input,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("Ollama embedding failed: {error}")));
        }

        let data: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse Ollama response: {e}")))?;

        data.embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("No embeddings returned from Ollama".into()))
    }
}
