//! Model2Vec embedding provider.
//!
//! In-process static embeddings. No server needed, but the model is
//! downloaded from the Hugging Face Hub on first load. Encoding is CPU
//! work and runs on the blocking thread pool.

use crate::error::{Error, Result};
use model2vec_rs::model::StaticModel;
use std::sync::Arc;

use super::gemini::truncate_chars;
use super::provider::EmbeddingProvider;
use super::types::{ProviderInfo, TaskType, model2vec_models};

/// Model2Vec embedding provider.
pub struct Model2VecProvider {
    model: Arc<StaticModel>,
    model_name: String,
    dimensions: usize,
    max_chars: usize,
}

impl Model2VecProvider {
    /// Load a Model2Vec model by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn with_model(model_name: &str) -> Result<Self> {
        let config = model2vec_models::get_config(model_name);

        let model = StaticModel::from_pretrained(model_name, None, None, None).map_err(|e| {
            Error::Embedding(format!("Failed to load Model2Vec model '{model_name}': {e}"))
        })?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimensions: config.dimensions,
            max_chars: config.max_chars,
        })
    }

    /// Try to load a provider, returning `None` (and logging) on failure.
    #[must_use]
    pub fn try_new(model_name: &str) -> Option<Self> {
        match Self::with_model(model_name) {
            Ok(provider) => Some(provider),
            Err(e) => {
                tracing::warn!(model = model_name, error = %e, "Model2Vec unavailable");
                None
            }
        }
    }
}

impl EmbeddingProvider for Model2VecProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "model2vec".to_string(),
            model: self.model_name.clone(),
            dimensions: self.dimensions,
            max_chars: self.max_chars,
            available: true, // Loaded at construction
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate_embedding(&self, text: &str, _task: TaskType) -> Result<Vec<f32>> {
        let sentences = vec![truncate_chars(text, self.max_chars).to_string()];
        let model = Arc::clone(&self.model);

        let embeddings = tokio::task::spawn_blocking(move || model.encode(&sentences))
            .await
            .map_err(|e| Error::Embedding(format!("Model2Vec worker failed: {e}")))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("Model2Vec returned no embeddings".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model2vec_config() {
        let config = model2vec_models::get_config("minishlab/potion-base-8M");
        assert_eq!(config.dimensions, 256);
        assert!(config.max_chars > 0);
    }
}
