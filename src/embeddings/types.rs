//! Embedding types and configuration.

use serde::{Deserialize, Serialize};

/// Local (fallback) embedding provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalProviderType {
    /// Ollama server on localhost
    #[default]
    Ollama,
    /// Model2Vec static embeddings, in process
    Model2vec,
    /// No local fallback
    None,
}

impl std::fmt::Display for LocalProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Model2vec => write!(f, "model2vec"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for LocalProviderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "model2vec" => Ok(Self::Model2vec),
            "none" | "off" => Ok(Self::None),
            _ => Err(format!("Unknown local embedder: {s}")),
        }
    }
}

/// What the embedding will be used for.
///
/// Retrieval-tuned models embed documents and queries differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// A record being indexed
    Document,
    /// A search query
    Query,
}

/// Embedding settings stored in `~/.feynkb/config.json`.
///
/// Keys mirror the environment variable names that override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct EmbeddingSettings {
    pub enabled: Option<bool>,
    pub local_provider: Option<LocalProviderType>,
    pub timeout_secs: Option<u64>,
    pub GOOGLE_API_KEY: Option<String>,
    pub GEMINI_EMBEDDING_MODEL_NAME: Option<String>,
    pub GEMINI_ENDPOINT: Option<String>,
    pub OLLAMA_ENDPOINT: Option<String>,
    pub OLLAMA_MODEL: Option<String>,
    pub MODEL2VEC_MODEL: Option<String>,
}

/// Provider metadata.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub dimensions: usize,
    pub max_chars: usize,
    pub available: bool,
}

/// Model configuration with dimensions and max chars.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub dimensions: usize,
    pub max_chars: usize,
}

/// Gemini embedding model configurations.
pub mod gemini_models {
    use super::ModelConfig;

    pub fn text_embedding_004() -> ModelConfig {
        ModelConfig {
            name: "text-embedding-004".to_string(),
            dimensions: 768,
            max_chars: 8000,
        }
    }

    pub fn get_config(model: &str) -> ModelConfig {
        match model.trim_start_matches("models/") {
            "text-embedding-004" => text_embedding_004(),
            other => ModelConfig {
                name: other.to_string(),
                dimensions: 768,
                max_chars: 8000,
            },
        }
    }
}

/// Ollama model configurations.
pub mod ollama_models {
    use super::ModelConfig;

    pub fn nomic_embed_text() -> ModelConfig {
        ModelConfig {
            name: "nomic-embed-text".to_string(),
            dimensions: 768,
            max_chars: 5000,
        }
    }

    pub fn mxbai_embed_large() -> ModelConfig {
        ModelConfig {
            name: "mxbai-embed-large".to_string(),
            dimensions: 1024,
            max_chars: 1500,
        }
    }

    pub fn get_config(model: &str) -> ModelConfig {
        match model {
            "nomic-embed-text" => nomic_embed_text(),
            "mxbai-embed-large" => mxbai_embed_large(),
            _ => ModelConfig {
                name: model.to_string(),
                dimensions: 768,
                max_chars: 5000,
            },
        }
    }
}

/// Model2Vec model configurations.
pub mod model2vec_models {
    use super::ModelConfig;

    pub fn potion_base_8m() -> ModelConfig {
        ModelConfig {
            name: "minishlab/potion-base-8M".to_string(),
            dimensions: 256,
            max_chars: 2048,
        }
    }

    pub fn get_config(model: &str) -> ModelConfig {
        match model {
            "minishlab/potion-base-8M" | "potion-base-8M" => potion_base_8m(),
            _ => ModelConfig {
                name: model.to_string(),
                dimensions: 256,
                max_chars: 2048,
            },
        }
    }
}
