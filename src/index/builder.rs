//! Full index build from the record store.

use serde::Serialize;
use tracing::{info, warn};

use super::forest::AngularForest;
use super::vector_index::VectorIndex;
use crate::error::Result;
use crate::model::is_finite;
use crate::storage::RecordStore;

/// Outcome of [`build_from_store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Records now in the index.
    pub indexed: usize,
    /// Embedded records skipped for a wrong dimension or non-finite
    /// components.
    pub skipped: usize,
}

/// Build a fresh index over every embedded record, in dataset order.
///
/// Embeddings of the wrong dimension or with NaN or infinite components
/// are logged and skipped.
///
/// Nothing from the current index is reused. With no valid embeddings the
/// persisted pair is removed and the index emptied, so queries fall through
/// to keyword search.
///
/// # Errors
///
/// Returns an error if the store cannot be read, or the build or
/// persistence fails. The previous index stays in place on error.
pub fn build_from_store(store: &RecordStore, index: &VectorIndex) -> Result<BuildReport> {
    let dimension = index.dimension();
    let mut ids = Vec::new();
    let mut vectors = Vec::new();
    let mut skipped = 0;

    for (reaction, vector) in store.records_with_embeddings()? {
        if vector.len() != dimension {
            warn!(
                reaction = %reaction,
                expected = dimension,
                actual = vector.len(),
                "Skipping embedding with wrong dimension"
            );
            skipped += 1;
        } else if !is_finite(&vector) {
            warn!(reaction = %reaction, "Skipping embedding with non-finite components");
            skipped += 1;
        } else {
            ids.push(reaction);
            vectors.push(vector);
        }
    }

    if ids.is_empty() {
        index.clear()?;
        info!(skipped, "No valid embeddings; vector index cleared");
        return Ok(BuildReport { indexed: 0, skipped });
    }

    let forest = AngularForest::build(&vectors, dimension, index.params())?;
    let indexed = ids.len();
    index.install(forest, ids)?;

    info!(indexed, skipped, "Built vector index from store");
    Ok(BuildReport { indexed, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ForestParams;
    use crate::model::DiagramRecord;
    use crate::storage::encode_embedding;
    use tempfile::TempDir;

    fn index_in(dir: &TempDir) -> VectorIndex {
        VectorIndex::new(
            2,
            ForestParams::default(),
            dir.path().join("feynman_kb.ann"),
            dir.path().join("feynman_kb_id_map.json"),
        )
    }

    #[test]
    fn test_build_skips_wrong_dimension() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open_memory().unwrap();
        store
            .upsert(&DiagramRecord::new("a", "t", "d").with_embedding(vec![1.0, 0.0]))
            .unwrap();
        store
            .upsert(&DiagramRecord::new("bad", "t", "d").with_embedding(vec![1.0, 0.0, 0.0]))
            .unwrap();
        store.upsert(&DiagramRecord::new("none", "t", "d")).unwrap();
        store
            .upsert(&DiagramRecord::new("c", "t", "d").with_embedding(vec![0.9, 0.1]))
            .unwrap();

        let index = index_in(&dir);
        let report = build_from_store(&store, &index).unwrap();
        assert_eq!(report, BuildReport { indexed: 2, skipped: 1 });
        assert_eq!(index.ids(), vec!["a", "c"]);

        let reopened = index_in(&dir);
        assert!(!reopened.load().unwrap().needs_rebuild());
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_build_skips_non_finite_embeddings() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("feynman_kb.db");
        let mut store = RecordStore::open(&db_path).unwrap();
        for (id, v) in [("a", [1.0, 0.0]), ("bad", [0.0, 1.0]), ("c", [0.9, 0.1])] {
            store
                .upsert(&DiagramRecord::new(id, "t", id).with_embedding(v.to_vec()))
                .unwrap();
        }

        // Rows written before finiteness was enforced.
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE diagrams SET embedding = ?1 WHERE reaction = 'bad'",
            [encode_embedding(&[f32::INFINITY, 0.0]).unwrap()],
        )
        .unwrap();

        let index = index_in(&dir);
        let report = build_from_store(&store, &index).unwrap();
        assert_eq!(report, BuildReport { indexed: 2, skipped: 1 });
        assert_eq!(index.ids(), vec!["a", "c"]);
    }

    #[test]
    fn test_build_with_no_embeddings_clears_index() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        index.add_or_update("old", &[1.0, 0.0]).unwrap();

        let mut store = RecordStore::open_memory().unwrap();
        store.upsert(&DiagramRecord::new("a", "t", "d")).unwrap();

        let report = build_from_store(&store, &index).unwrap();
        assert_eq!(report.indexed, 0);
        assert!(index.is_empty());
        assert!(!dir.path().join("feynman_kb.ann").exists());
        assert!(index.search(&[1.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_build_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        index.add_or_update("stale", &[0.0, 1.0]).unwrap();

        let mut store = RecordStore::open_memory().unwrap();
        store
            .upsert(&DiagramRecord::new("fresh", "t", "d").with_embedding(vec![1.0, 0.0]))
            .unwrap();

        build_from_store(&store, &index).unwrap();
        assert_eq!(index.ids(), vec!["fresh"]);
    }
}
