//! Remote tier: a hosted semantic search service.
//!
//! Request: `POST {endpoint}` with JSON `{"query": "...", "k": 5}` and an
//! optional bearer token. Response: a ranked list of record-shaped objects
//! carrying `relevance_score`, either as a bare array or wrapped as
//! `{"results": [...]}`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{SearchHit, SearchTier, Tier, TierFuture, TierOutcome};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::sync::RawRecord;

pub struct RemoteTier {
    client: reqwest::Client,
    endpoint: Option<String>,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    k: usize,
}

#[derive(Debug, Deserialize)]
struct RemoteHit {
    #[serde(flatten)]
    record: RawRecord,
    #[serde(default)]
    relevance_score: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped { results: Vec<RemoteHit> },
    Bare(Vec<RemoteHit>),
}

impl SearchResponse {
    fn into_hits(self) -> Vec<SearchHit> {
        let (Self::Wrapped { results } | Self::Bare(results)) = self;
        results
            .into_iter()
            .filter_map(|hit| {
                hit.record.into_record().map(|record| SearchHit {
                    record,
                    tier: Tier::Remote,
                    score: hit.relevance_score,
                })
            })
            .collect()
    }
}

impl RemoteTier {
    #[must_use]
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config
                .endpoint
                .as_ref()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            token: config.token.clone(),
            timeout: config.timeout,
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn query(&self, endpoint: &str, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let mut request = self
            .client
            .post(endpoint)
            .timeout(self.timeout)
            .json(&SearchRequest { query, k });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Remote(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(format!("search failed ({status}): {body}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Remote(format!("invalid response: {e}")))?;
        Ok(parsed.into_hits())
    }
}

impl SearchTier for RemoteTier {
    fn tier(&self) -> Tier {
        Tier::Remote
    }

    fn attempt<'a>(&'a self, query: &'a str, k: usize) -> TierFuture<'a> {
        Box::pin(async move {
            let Some(endpoint) = &self.endpoint else {
                return Ok(TierOutcome::Unavailable("no remote endpoint configured".into()));
            };
            let hits = self.query(endpoint, query, k).await?;
            Ok(TierOutcome::Hits(hits))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: Option<&str>) -> RemoteConfig {
        RemoteConfig {
            endpoint: endpoint.map(str::to_string),
            token: None,
            timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_parses_both_response_shapes() {
        let wrapped: SearchResponse = serde_json::from_str(
            r#"{"results": [{"reaction": "a", "topic": "QED", "relevance_score": 0.9}]}"#,
        )
        .unwrap();
        let hits = wrapped.into_hits();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.topic, "QED");
        assert_eq!(hits[0].score, Some(0.9));
        assert_eq!(hits[0].tier, Tier::Remote);

        let bare: SearchResponse =
            serde_json::from_str(r#"[{"reaction": "a"}, {"topic": "missing reaction"}]"#).unwrap();
        let hits = bare.into_hits();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, None);
        assert_eq!(hits[0].record.process_type, "N/A");
    }

    #[tokio::test]
    async fn test_unconfigured_is_unavailable() {
        let tier = RemoteTier::from_config(&config(None));
        assert!(!tier.is_configured());
        assert!(matches!(
            tier.attempt("q", 5).await.unwrap(),
            TierOutcome::Unavailable(_)
        ));

        let blank = RemoteTier::from_config(&config(Some("  ")));
        assert!(!blank.is_configured());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error() {
        let tier = RemoteTier::from_config(&config(Some("http://127.0.0.1:9/search")));
        assert!(matches!(tier.attempt("q", 5).await, Err(Error::Remote(_))));
    }
}
