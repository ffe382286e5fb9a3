//! Embedding provider factory.
//!
//! Handles provider detection and chain creation.

use tracing::debug;

use super::chain::Embedder;
use super::config::EmbedderConfig;
use super::gemini::GeminiProvider;
use super::model2vec::Model2VecProvider;
use super::ollama::OllamaProvider;
use super::provider::{BoxedProvider, EmbeddingProvider};
use super::types::LocalProviderType;

/// Available provider detection result.
#[derive(Debug, Clone)]
pub struct ProviderDetection {
    /// Providers that answered, in chain order.
    pub available: Vec<String>,
    /// Providers that are configured but did not answer.
    pub unavailable: Vec<String>,
}

impl ProviderDetection {
    fn record(&mut self, name: &str, ok: bool) {
        if ok {
            self.available.push(name.to_string());
        } else {
            self.unavailable.push(name.to_string());
        }
    }
}

/// Probe the configured providers.
///
/// Model2Vec is reported available only if its model loads.
pub async fn detect_available_providers(config: &EmbedderConfig) -> ProviderDetection {
    let mut detection = ProviderDetection {
        available: Vec::new(),
        unavailable: Vec::new(),
    };

    if let Some(gemini) = GeminiProvider::from_config(config) {
        let ok = gemini.is_available().await;
        detection.record("gemini", ok);
    }

    match config.local {
        LocalProviderType::Ollama => {
            let ok = OllamaProvider::from_config(config).is_available().await;
            detection.record("ollama", ok);
        }
        LocalProviderType::Model2vec => {
            let ok = Model2VecProvider::try_new(&config.model2vec_model).is_some();
            detection.record("model2vec", ok);
        }
        LocalProviderType::None => {}
    }

    detection
}

/// Build the provider chain: Gemini (when a key is set), then the local
/// fallback.
///
/// Returns a disabled chain when embeddings are turned off.
#[must_use]
pub fn create_embedder(config: &EmbedderConfig, dimension: usize) -> Embedder {
    if !config.enabled {
        debug!("embeddings disabled by configuration");
        return Embedder::disabled(dimension);
    }

    let mut providers = Vec::new();

    if let Some(gemini) = GeminiProvider::from_config(config) {
        providers.push(BoxedProvider::new(gemini));
    }

    match config.local {
        LocalProviderType::Ollama => {
            providers.push(BoxedProvider::new(OllamaProvider::from_config(config)));
        }
        LocalProviderType::Model2vec => {
            if let Some(provider) = Model2VecProvider::try_new(&config.model2vec_model) {
                providers.push(BoxedProvider::new(provider));
            }
        }
        LocalProviderType::None => {}
    }

    let embedder = Embedder::new(providers, dimension, config.timeout);
    debug!(providers = ?embedder.provider_names(), dimension, "embedding chain ready");
    embedder
}
