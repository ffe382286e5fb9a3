//! Gemini embedding provider.
//!
//! Primary (remote) provider. Calls the Generative Language
//! `embedContent` endpoint with a retrieval task hint.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

use super::config::EmbedderConfig;
use super::provider::EmbeddingProvider;
use super::types::{ProviderInfo, TaskType, gemini_models};

/// Gemini embedding provider.
pub struct GeminiProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimensions: usize,
    max_chars: usize,
}

impl GeminiProvider {
    /// Create a provider from resolved configuration.
    ///
    /// Returns `None` when no API key is configured.
    #[must_use]
    pub fn from_config(config: &EmbedderConfig) -> Option<Self> {
        let api_key = config.gemini_api_key.clone()?;
        let model_config = gemini_models::get_config(&config.gemini_model);

        Some(Self {
            client: reqwest::Client::new(),
            endpoint: config.gemini_endpoint.trim_end_matches('/').to_string(),
            model: model_config.name,
            api_key,
            dimensions: model_config.dimensions,
            max_chars: model_config.max_chars,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:embedContent", self.endpoint, self.model)
    }
}

const fn task_name(task: TaskType) -> &'static str {
    match task {
        TaskType::Document => "RETRIEVAL_DOCUMENT",
        TaskType::Query => "RETRIEVAL_QUERY",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

impl EmbeddingProvider for GeminiProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "gemini".to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
            max_chars: self.max_chars,
            available: !self.api_key.is_empty(),
        }
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models/{}", self.endpoint, self.model);

        self.client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(std::time::Duration::from_secs(2))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn generate_embedding(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        let text = truncate_chars(text, self.max_chars);
        let request = EmbedContentRequest {
            model: format!("models/{}", self.model),
            content: Content {
                parts: [Part { text }],
            },
            task_type: task_name(task),
        };

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "Gemini embedding failed ({status}): {error}"
            )));
        }

        let data: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse Gemini response: {e}")))?;

        if data.embedding.values.is_empty() {
            return Err(Error::Embedding("Gemini returned an empty embedding".into()));
        }
        Ok(data.embedding.values)
    }
}

/// Cut `text` to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let config = EmbedderConfig::default();
        assert!(GeminiProvider::from_config(&config).is_none());

        let config = EmbedderConfig {
            gemini_api_key: Some("key".into()),
            ..EmbedderConfig::default()
        };
        let provider = GeminiProvider::from_config(&config).unwrap();
        let info = provider.info();
        assert_eq!(info.name, "gemini");
        assert_eq!(info.dimensions, 768);
        assert!(provider.url().ends_with("/models/text-embedding-004:embedContent"));
    }

    #[test]
    fn test_request_shape() {
        let request = EmbedContentRequest {
            model: "models/text-embedding-004".into(),
            content: Content {
                parts: [Part { text: "e+ e- -> mu+ mu-" }],
            },
            task_type: task_name(TaskType::Query),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["taskType"], "RETRIEVAL_QUERY");
        assert_eq!(json["content"]["parts"][0]["text"], "e+ e- -> mu+ mu-");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("γγ → e+e-", 2), "γγ");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
