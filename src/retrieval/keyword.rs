//! Keyword tier: case-insensitive substring match over the record store.

use super::{SearchHit, SearchTier, Tier, TierFuture, TierOutcome};
use crate::storage::{SharedStore, lock_store};

/// Last-resort tier; needs nothing but the store.
pub struct KeywordTier {
    store: SharedStore,
}

impl KeywordTier {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

impl SearchTier for KeywordTier {
    fn tier(&self) -> Tier {
        Tier::Keyword
    }

    fn attempt<'a>(&'a self, query: &'a str, k: usize) -> TierFuture<'a> {
        Box::pin(async move {
            let records = lock_store(&self.store).query_by_substring(query, k)?;
            Ok(TierOutcome::Hits(
                records
                    .into_iter()
                    .map(|record| SearchHit {
                        record,
                        tier: Tier::Keyword,
                        score: None,
                    })
                    .collect(),
            ))
        })
    }
}
