//! Process-lifetime embedding cache for a known record list.
//!
//! Keys are positions in the record list (dataset order, which is stable
//! because records are never deleted). Each entry remembers the text it was
//! computed from: a position whose text changed is recomputed, and a text
//! already embedded at another position is reused without a provider call.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::chain::Embedder;
use super::types::TaskType;

#[derive(Debug, Default)]
struct CacheInner {
    by_position: HashMap<usize, (String, Vec<f32>)>,
    by_text: HashMap<String, usize>,
}

/// Positional embedding cache, deduplicated by source text.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of cached positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().by_position.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached vector for `position`, if it was computed from `text`.
    #[must_use]
    pub fn get(&self, position: usize, text: &str) -> Option<Vec<f32>> {
        let inner = self.lock();
        if let Some((cached_text, vector)) = inner.by_position.get(&position) {
            if cached_text == text {
                return Some(vector.clone());
            }
        }
        inner
            .by_text
            .get(text)
            .and_then(|pos| inner.by_position.get(pos))
            .filter(|(cached_text, _)| cached_text == text)
            .map(|(_, vector)| vector.clone())
    }

    /// Record `vector` as the embedding of `text` at `position`.
    pub fn insert(&self, position: usize, text: &str, vector: Vec<f32>) {
        let mut inner = self.lock();
        inner.by_text.insert(text.to_string(), position);
        inner
            .by_position
            .insert(position, (text.to_string(), vector));
    }

    /// Cached vector for `position`, embedding `text` on a miss.
    ///
    /// Returns `None` if the embedder fails; failures are not cached.
    pub async fn get_or_embed(
        &self,
        position: usize,
        text: &str,
        embedder: &Embedder,
    ) -> Option<Vec<f32>> {
        if let Some(vector) = self.get(position, text) {
            self.insert(position, text, vector.clone());
            return Some(vector);
        }

        let vector = embedder.embed(text, TaskType::Document).await?;
        self.insert(position, text, vector.clone());
        Some(vector)
    }
}
