//! Tiered similarity search.
//!
//! A [`Retriever`] holds an ordered list of [`SearchTier`] strategies:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Retriever::search(query, k, prefer_remote)   │
//! └──────────────────────┬───────────────────────┘
//!                        │ first tier with hits wins
//!        ┌───────────────┼────────────────┐
//!        ▼               ▼                ▼
//!   RemoteTier      VectorTier       KeywordTier
//!   (HTTP POST)     (embed + ANN     (substring
//!                    + hydrate)       over store)
//! ```
//!
//! A tier is consulted only when every earlier tier failed, found nothing,
//! or was unavailable. Search itself never fails: total failure is an
//! empty list.

mod keyword;
mod remote;
mod vector;

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::DiagramRecord;

pub use keyword::KeywordTier;
pub use remote::RemoteTier;
pub use vector::VectorTier;

/// Default number of results.
pub const DEFAULT_K: usize = 5;

/// Which strategy produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Remote,
    Vector,
    Keyword,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Vector => write!(f, "vector"),
            Self::Keyword => write!(f, "keyword"),
        }
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub record: DiagramRecord,
    pub tier: Tier,
    /// Tier-specific score: remote relevance (higher is better) or angular
    /// distance (lower is better). Keyword hits are unscored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// What a tier produced.
#[derive(Debug)]
pub enum TierOutcome {
    Hits(Vec<SearchHit>),
    /// The tier cannot serve this query (not configured, no index, embedding
    /// failed).
    Unavailable(String),
}

/// Boxed future returned by [`SearchTier::attempt`].
pub type TierFuture<'a> = Pin<Box<dyn Future<Output = Result<TierOutcome>> + Send + 'a>>;

/// A search strategy.
pub trait SearchTier: Send + Sync {
    fn tier(&self) -> Tier;

    /// Try to answer `query` with at most `k` hits.
    fn attempt<'a>(&'a self, query: &'a str, k: usize) -> TierFuture<'a>;
}

/// Ordered tier list with first-non-empty-wins semantics.
pub struct Retriever {
    tiers: Vec<Box<dyn SearchTier>>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("tiers", &self.tier_order())
            .finish()
    }
}

impl Retriever {
    #[must_use]
    pub fn new(tiers: Vec<Box<dyn SearchTier>>) -> Self {
        Self { tiers }
    }

    /// Tiers in the order they are tried.
    #[must_use]
    pub fn tier_order(&self) -> Vec<Tier> {
        self.tiers.iter().map(|t| t.tier()).collect()
    }

    /// Search, falling through tiers until one returns hits.
    ///
    /// The remote tier is skipped when `prefer_remote` is false. A blank
    /// query or `k == 0` returns nothing without consulting any tier.
    pub async fn search(&self, query: &str, k: usize, prefer_remote: bool) -> Vec<SearchHit> {
        if query.trim().is_empty() || k == 0 {
            return Vec::new();
        }

        for tier in &self.tiers {
            let name = tier.tier();
            if name == Tier::Remote && !prefer_remote {
                debug!(tier = %name, "Skipping remote tier");
                continue;
            }

            match tier.attempt(query, k).await {
                Ok(TierOutcome::Hits(mut hits)) if !hits.is_empty() => {
                    hits.truncate(k);
                    info!(tier = %name, results = hits.len(), "Search answered");
                    return hits;
                }
                Ok(TierOutcome::Hits(_)) => debug!(tier = %name, "Tier found nothing"),
                Ok(TierOutcome::Unavailable(reason)) => {
                    debug!(tier = %name, reason = %reason, "Tier unavailable");
                }
                Err(e) => warn!(tier = %name, error = %e, "Tier failed; falling back"),
            }
        }

        info!(query = %query, "No tier produced results");
        Vec::new()
    }
}
