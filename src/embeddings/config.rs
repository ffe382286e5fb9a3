//! Embedding configuration resolution.
//!
//! Priority for every setting: env var > config file > default.

use crate::config::{EnvLookup, parse_flag, parse_number};
use crate::error::{Error, Result};
use std::time::Duration;

use super::types::{EmbeddingSettings, LocalProviderType};

pub const DEFAULT_GEMINI_MODEL: &str = "text-embedding-004";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_MODEL2VEC_MODEL: &str = "minishlab/potion-base-8M";
pub const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;

/// Resolved embedding configuration.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub enabled: bool,
    /// Gemini API key; the remote provider is skipped without one.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_endpoint: String,
    pub local: LocalProviderType,
    pub ollama_endpoint: String,
    pub ollama_model: String,
    pub model2vec_model: String,
    /// Per-provider call timeout.
    pub timeout: Duration,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            local: LocalProviderType::default(),
            ollama_endpoint: DEFAULT_OLLAMA_ENDPOINT.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            model2vec_model: DEFAULT_MODEL2VEC_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_EMBEDDING_TIMEOUT_SECS),
        }
    }
}

impl EmbedderConfig {
    /// Resolve from optional file settings and an environment lookup.
    ///
    /// # Errors
    ///
    /// Returns a config error if `FKB_LOCAL_EMBEDDER` names an unknown
    /// provider or `FKB_EMBEDDING_TIMEOUT_SECS` is not a number.
    pub fn resolve(settings: Option<&EmbeddingSettings>, env: EnvLookup<'_>) -> Result<Self> {
        let file = settings.cloned().unwrap_or_default();
        let defaults = Self::default();

        let enabled = env("FKB_EMBEDDINGS_ENABLED")
            .map(|v| parse_flag(&v))
            .or(file.enabled)
            .unwrap_or(true);

        let local = match env("FKB_LOCAL_EMBEDDER") {
            Some(raw) => raw.parse().map_err(Error::Config)?,
            None => file.local_provider.unwrap_or_default(),
        };

        let timeout_secs = match env("FKB_EMBEDDING_TIMEOUT_SECS") {
            Some(raw) => parse_number("FKB_EMBEDDING_TIMEOUT_SECS", &raw)?,
            None => file.timeout_secs.unwrap_or(DEFAULT_EMBEDDING_TIMEOUT_SECS),
        };

        Ok(Self {
            enabled,
            gemini_api_key: env("GOOGLE_API_KEY").or(file.GOOGLE_API_KEY),
            gemini_model: env("GEMINI_EMBEDDING_MODEL_NAME")
                .or(file.GEMINI_EMBEDDING_MODEL_NAME)
                .unwrap_or(defaults.gemini_model),
            gemini_endpoint: env("GEMINI_ENDPOINT")
                .or(file.GEMINI_ENDPOINT)
                .unwrap_or(defaults.gemini_endpoint),
            local,
            ollama_endpoint: env("OLLAMA_ENDPOINT")
                .or(file.OLLAMA_ENDPOINT)
                .unwrap_or(defaults.ollama_endpoint),
            ollama_model: env("OLLAMA_MODEL")
                .or(file.OLLAMA_MODEL)
                .unwrap_or(defaults.ollama_model),
            model2vec_model: env("MODEL2VEC_MODEL")
                .or(file.MODEL2VEC_MODEL)
                .unwrap_or(defaults.model2vec_model),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let config = EmbedderConfig::resolve(None, &|_| None).unwrap();
        assert!(config.enabled);
        assert!(config.gemini_api_key.is_none());
        assert_eq!(config.gemini_model, "text-embedding-004");
        assert_eq!(config.local, LocalProviderType::Ollama);
        assert_eq!(config.ollama_endpoint, "http://localhost:11434");
    }

    #[test]
    fn test_env_overrides_file() {
        let settings = EmbeddingSettings {
            OLLAMA_MODEL: Some("mxbai-embed-large".into()),
            GOOGLE_API_KEY: Some("file-key".into()),
            ..EmbeddingSettings::default()
        };
        let env = |key: &str| match key {
            "GOOGLE_API_KEY" => Some("env-key".to_string()),
            "FKB_EMBEDDINGS_ENABLED" => Some("false".to_string()),
            "FKB_LOCAL_EMBEDDER" => Some("model2vec".to_string()),
            _ => None,
        };

        let config = EmbedderConfig::resolve(Some(&settings), &env).unwrap();
        assert_eq!(config.gemini_api_key.as_deref(), Some("env-key"));
        assert_eq!(config.ollama_model, "mxbai-embed-large");
        assert_eq!(config.local, LocalProviderType::Model2vec);
        assert!(!config.enabled);
    }

    #[test]
    fn test_unknown_local_embedder_is_error() {
        let env = |key: &str| (key == "FKB_LOCAL_EMBEDDER").then(|| "word2vec".to_string());
        assert!(EmbedderConfig::resolve(None, &env).is_err());
    }
}
