//! Embedding provider trait.
//!
//! Defines the interface that all embedding providers must implement.
//! Uses async methods for HTTP-based providers.

use crate::error::Result;
use std::future::Future;
use std::pin::Pin;

use super::types::{ProviderInfo, TaskType};

/// Trait for embedding providers.
///
/// Implemented by the Gemini, Ollama and Model2Vec providers.
pub trait EmbeddingProvider: Send + Sync {
    /// Get provider metadata.
    fn info(&self) -> ProviderInfo;

    /// Check if the provider is reachable and configured.
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Generate an embedding for a single text.
    fn generate_embedding(
        &self,
        text: &str,
        task: TaskType,
    ) -> impl Future<Output = Result<Vec<f32>>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed provider for dynamic dispatch.
///
/// Since the trait has async methods with `impl Future`, we need this wrapper
/// for runtime polymorphism.
pub struct BoxedProvider {
    inner: Box<dyn EmbeddingProviderBoxed + Send + Sync>,
}

/// Object-safe version of `EmbeddingProvider` for boxing.
trait EmbeddingProviderBoxed: Send + Sync {
    fn info(&self) -> ProviderInfo;
    fn is_available_boxed(&self) -> BoxFuture<'_, bool>;
    fn generate_embedding_boxed(&self, text: &str, task: TaskType) -> BoxFuture<'_, Result<Vec<f32>>>;
}

impl BoxedProvider {
    /// Create a new boxed provider.
    pub fn new<P: EmbeddingProvider + 'static>(provider: P) -> Self {
        Self {
            inner: Box::new(BoxedProviderWrapper(provider)),
        }
    }

    /// Get provider metadata.
    #[must_use]
    pub fn info(&self) -> ProviderInfo {
        self.inner.info()
    }

    /// Check if the provider is available.
    pub async fn is_available(&self) -> bool {
        self.inner.is_available_boxed().await
    }

    /// Generate an embedding for a single text.
    ///
    /// # Errors
    ///
    /// Propagates the provider's failure.
    pub async fn generate_embedding(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        self.inner.generate_embedding_boxed(text, task).await
    }
}

impl std::fmt::Debug for BoxedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.info();
        f.debug_struct("BoxedProvider")
            .field("name", &info.name)
            .field("model", &info.model)
            .finish()
    }
}

/// Wrapper to implement `EmbeddingProviderBoxed` for any `EmbeddingProvider`.
struct BoxedProviderWrapper<P: EmbeddingProvider + 'static>(P);

impl<P: EmbeddingProvider + 'static> EmbeddingProviderBoxed for BoxedProviderWrapper<P> {
    fn info(&self) -> ProviderInfo {
        self.0.info()
    }

    fn is_available_boxed(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.0.is_available())
    }

    fn generate_embedding_boxed(&self, text: &str, task: TaskType) -> BoxFuture<'_, Result<Vec<f32>>> {
        // The returned future outlives `text`, so it owns a copy.
        let text_owned = text.to_string();
        Box::pin(async move { self.0.generate_embedding(&text_owned, task).await })
    }
}
