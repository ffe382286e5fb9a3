//! Ordered provider chain with dimension validation.
//!
//! Providers are tried in order (remote first, then the local fallback).
//! Each call gets its own timeout; a timeout, an error, or a vector of the
//! wrong length all count as a failure of that provider and the next one
//! is tried. There is no caching at this layer.

use crate::error::{Error, Result};
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::BoxedProvider;
use super::types::TaskType;

/// A successful embedding and the provider that produced it.
#[derive(Debug, Clone)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub provider: String,
}

/// Embedding provider chain for a fixed dimension.
#[derive(Debug)]
pub struct Embedder {
    providers: Vec<BoxedProvider>,
    dimension: usize,
    timeout: Duration,
}

impl Embedder {
    #[must_use]
    pub fn new(providers: Vec<BoxedProvider>, dimension: usize, timeout: Duration) -> Self {
        Self {
            providers,
            dimension,
            timeout,
        }
    }

    /// A chain with no providers. Every call fails, so callers degrade to
    /// keyword search.
    #[must_use]
    pub fn disabled(dimension: usize) -> Self {
        Self::new(Vec::new(), dimension, Duration::from_secs(1))
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Names of the configured providers, in try order.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.info().name).collect()
    }

    /// Embed `text`, reporting the last provider error on total failure.
    ///
    /// # Errors
    ///
    /// Returns the last provider's error (or a dimension mismatch) when no
    /// provider produced a valid vector.
    pub async fn try_embed(&self, text: &str, task: TaskType) -> Result<Embedded> {
        if text.trim().is_empty() {
            return Err(Error::InvalidArgument("cannot embed empty text".into()));
        }

        let mut last_error = None;
        for provider in &self.providers {
            let name = provider.info().name;
            let outcome =
                tokio::time::timeout(self.timeout, provider.generate_embedding(text, task)).await;

            let error = match outcome {
                Ok(Ok(vector)) => match self.validate(&vector) {
                    Ok(()) => {
                        debug!(provider = %name, "embedding generated");
                        return Ok(Embedded {
                            vector,
                            provider: name,
                        });
                    }
                    Err(e) => e,
                },
                Ok(Err(e)) => e,
                Err(_) => Error::Embedding(format!(
                    "{name} timed out after {}s",
                    self.timeout.as_secs()
                )),
            };

            debug!(provider = %name, error = %error, "embedding provider failed");
            last_error = Some(error);
        }

        Err(last_error
            .unwrap_or_else(|| Error::Embedding("no embedding providers configured".into())))
    }

    /// Embed `text`, returning `None` on total failure.
    pub async fn embed(&self, text: &str, task: TaskType) -> Option<Vec<f32>> {
        match self.try_embed(text, task).await {
            Ok(embedded) => Some(embedded.vector),
            Err(e) => {
                warn!(error = %e, "all embedding providers failed");
                None
            }
        }
    }

    fn validate(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::Embedding("embedding contains non-finite values".into()));
        }
        Ok(())
    }
}
