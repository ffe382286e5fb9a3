//! Local vector tier: embed the query, search the index, hydrate records.

use std::collections::HashMap;
use std::sync::Arc;

use super::{SearchHit, SearchTier, Tier, TierFuture, TierOutcome};
use crate::embeddings::{Embedder, TaskType};
use crate::index::VectorIndex;
use crate::storage::{SharedStore, lock_store};

pub struct VectorTier {
    embedder: Arc<Embedder>,
    index: Arc<VectorIndex>,
    store: SharedStore,
}

impl VectorTier {
    #[must_use]
    pub fn new(embedder: Arc<Embedder>, index: Arc<VectorIndex>, store: SharedStore) -> Self {
        Self {
            embedder,
            index,
            store,
        }
    }
}

impl SearchTier for VectorTier {
    fn tier(&self) -> Tier {
        Tier::Vector
    }

    fn attempt<'a>(&'a self, query: &'a str, k: usize) -> TierFuture<'a> {
        Box::pin(async move {
            if self.index.is_empty() {
                return Ok(TierOutcome::Unavailable("vector index is empty".into()));
            }
            if !self.embedder.is_enabled() {
                return Ok(TierOutcome::Unavailable("embeddings are disabled".into()));
            }
            let Some(vector) = self.embedder.embed(query, TaskType::Query).await else {
                return Ok(TierOutcome::Unavailable("query embedding failed".into()));
            };

            let neighbors = self.index.search(&vector, k)?;
            let ids: Vec<String> = neighbors.iter().map(|n| n.id.clone()).collect();
            let distances: HashMap<&str, f32> = neighbors
                .iter()
                .map(|n| (n.id.as_str(), n.distance))
                .collect();

            // get_by_ids keeps the requested (rank) order.
            let records = lock_store(&self.store).get_by_ids(&ids)?;
            let hits = records
                .into_iter()
                .map(|record| {
                    let score = distances.get(record.reaction.as_str()).copied();
                    SearchHit {
                        record,
                        tier: Tier::Vector,
                        score,
                    }
                })
                .collect();
            Ok(TierOutcome::Hits(hits))
        })
    }
}
