//! Knowledge base lifecycle through the public API.

use std::collections::HashMap;
use std::time::Duration;

use fkb::KnowledgeBase;
use fkb::config::KbConfig;
use fkb::embeddings::{BoxedProvider, Embedder, EmbeddingProvider, ProviderInfo, TaskType};
use fkb::error::{Error, Result};
use fkb::index::LoadOutcome;
use fkb::model::DiagramRecord;
use fkb::retrieval::Tier;
use fkb::sync::read_delta;
use tempfile::TempDir;

/// Provider answering from a fixed table of texts.
struct TableProvider {
    vectors: HashMap<&'static str, Vec<f32>>,
}

impl EmbeddingProvider for TableProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "table".to_string(),
            model: "table".to_string(),
            dimensions: 2,
            max_chars: usize::MAX,
            available: true,
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate_embedding(&self, text: &str, _task: TaskType) -> Result<Vec<f32>> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| Error::Embedding(format!("no vector for {text}")))
    }
}

fn embedder() -> Embedder {
    let vectors = HashMap::from([
        ("a", vec![1.0, 0.0]),
        ("b", vec![0.0, 1.0]),
        ("c", vec![0.9, 0.1]),
        ("along x", vec![1.0, 0.0]),
        ("along y", vec![0.0, 1.0]),
    ]);
    Embedder::new(
        vec![BoxedProvider::new(TableProvider { vectors })],
        2,
        Duration::from_secs(5),
    )
}

fn config(dir: &TempDir) -> KbConfig {
    let mut config = KbConfig::for_data_dir(dir.path()).unwrap();
    config.dimension = 2;
    config.autosave.enabled = false;
    config
}

async fn seed(kb: &KnowledgeBase) {
    for id in ["a", "b", "c"] {
        kb.add_record(DiagramRecord::new(id, "toy", id)).await.unwrap();
    }
}

#[tokio::test]
async fn test_index_and_delta_survive_reopen() {
    let dir = TempDir::new().unwrap();

    let kb = KnowledgeBase::open_with_embedder(config(&dir), embedder()).unwrap();
    seed(&kb).await;
    assert_eq!(kb.close().unwrap(), 3);

    let delta: Vec<String> = read_delta(&config(&dir).delta_path())
        .into_iter()
        .map(|r| r.reaction)
        .collect();
    assert_eq!(delta, vec!["a", "b", "c"]);

    let kb = KnowledgeBase::open_with_embedder(config(&dir), embedder()).unwrap();
    assert_eq!(kb.index().len(), 3);

    let hits = kb.search("along y", 1, true).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.reaction, "b");
    assert_eq!(hits[0].tier, Tier::Vector);
}

#[tokio::test]
async fn test_missing_id_map_is_rebuilt_from_store() {
    let dir = TempDir::new().unwrap();

    let kb = KnowledgeBase::open_with_embedder(config(&dir), embedder()).unwrap();
    seed(&kb).await;
    kb.close().unwrap();

    std::fs::remove_file(config(&dir).id_map_path()).unwrap();

    let kb = KnowledgeBase::open_with_embedder(config(&dir), embedder()).unwrap();
    assert_eq!(kb.index().len(), 3);
    assert!(config(&dir).id_map_path().exists());

    let hits = kb.search("along x", 2, true).await;
    let reactions: Vec<&str> = hits.iter().map(|h| h.record.reaction.as_str()).collect();
    assert_eq!(reactions, vec!["a", "c"]);
}

#[tokio::test]
async fn test_keyword_tier_serves_unembeddable_queries() {
    let dir = TempDir::new().unwrap();

    let kb = KnowledgeBase::open_with_embedder(config(&dir), embedder()).unwrap();
    seed(&kb).await;

    let mut record = DiagramRecord::new("q qbar -> g g", "QCD", "Gluon pair from quark annihilation");
    record.embedding = Some(vec![0.5, 0.5]);
    kb.add_record(record).await.unwrap();

    // "gluon" has no vector, so the vector tier is unavailable.
    let hits = kb.search("gluon", 5, true).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.reaction, "q qbar -> g g");
    assert_eq!(hits[0].tier, Tier::Keyword);
}

#[test]
fn test_fresh_directory_loads_as_missing() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let index = fkb::index::VectorIndex::for_config(&config);
    assert_eq!(index.load().unwrap(), LoadOutcome::Missing);
    assert!(index.is_empty());
}
