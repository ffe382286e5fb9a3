//! The knowledge base: one object owning the store, index, embedder,
//! retriever and write-back queue.
//!
//! Construct it once per process with [`KnowledgeBase::open`], pass it by
//! reference, and call [`KnowledgeBase::close`] at shutdown to flush the
//! autosave queue.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::KbConfig;
use crate::embeddings::{Embedder, EmbeddingCache, TaskType, create_embedder};
use crate::error::Result;
use crate::index::{BuildReport, IndexStatus, LoadOutcome, VectorIndex, build_from_store};
use crate::model::DiagramRecord;
use crate::retrieval::{KeywordTier, RemoteTier, Retriever, SearchHit, SearchTier, VectorTier};
use crate::storage::{EmbeddingStats, RecordStore, SharedStore, lock_store, shared};
use crate::sync::{AutosaveQueue, DeltaStatus, delta_status, read_delta, read_records, write_delta};

/// Where a newly added record's embedding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSource {
    /// Supplied with the record.
    Provided,
    /// Stored embedding for the same reaction and description.
    Reused,
    /// Computed by the provider chain.
    Computed,
    /// Every provider failed; the record is keyword-searchable only.
    Missing,
}

impl std::fmt::Display for EmbeddingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provided => write!(f, "provided"),
            Self::Reused => write!(f, "reused"),
            Self::Computed => write!(f, "computed"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub reaction: String,
    pub embedding: EmbeddingSource,
    pub indexed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub reused_embeddings: usize,
    pub index: BuildReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FoldReport {
    pub folded: usize,
    pub index: BuildReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub candidates: usize,
    pub embedded: usize,
    pub failed: usize,
    pub index: Option<BuildReport>,
}

/// Stateful engine handle.
pub struct KnowledgeBase {
    config: KbConfig,
    store: SharedStore,
    index: Arc<VectorIndex>,
    embedder: Arc<Embedder>,
    retriever: Retriever,
    autosave: AutosaveQueue,
    cache: EmbeddingCache,
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("data_dir", &self.config.data_dir)
            .field("index", &self.index)
            .field("retriever", &self.retriever)
            .finish_non_exhaustive()
    }
}

impl KnowledgeBase {
    /// Open the knowledge base with the configured embedding providers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the index cannot
    /// be loaded or built.
    pub fn open(config: KbConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embeddings, config.dimension);
        Self::open_with_embedder(config, embedder)
    }

    /// Open with an explicit provider chain.
    ///
    /// Loads the persisted index; when it is missing or inconsistent and
    /// the store holds valid embeddings, rebuilds it from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened, the index cannot be
    /// loaded or rebuilt, or the autosave thread cannot start.
    pub fn open_with_embedder(config: KbConfig, embedder: Embedder) -> Result<Self> {
        let store = RecordStore::open(&config.db_path())?;

        let index = VectorIndex::for_config(&config);
        let outcome = index.load()?;
        if outcome.needs_rebuild() {
            let stats = store.embedding_stats(config.dimension)?;
            if stats.valid > 0 {
                info!(?outcome, embedded = stats.valid, "Building vector index from store");
                build_from_store(&store, &index)?;
            } else if outcome != LoadOutcome::Missing {
                debug!(?outcome, "No embedded records to rebuild the index from");
            }
        }

        let autosave = if config.autosave.enabled {
            AutosaveQueue::start(config.delta_path(), config.autosave.interval)?
        } else {
            AutosaveQueue::new(config.delta_path())
        };

        let store = shared(store);
        let index = Arc::new(index);
        let embedder = Arc::new(embedder);
        let tiers: Vec<Box<dyn SearchTier>> = vec![
            Box::new(RemoteTier::from_config(&config.remote)),
            Box::new(VectorTier::new(
                Arc::clone(&embedder),
                Arc::clone(&index),
                Arc::clone(&store),
            )),
            Box::new(KeywordTier::new(Arc::clone(&store))),
        ];

        info!(
            data_dir = %config.data_dir.display(),
            indexed = index.len(),
            providers = ?embedder.provider_names(),
            "Knowledge base open"
        );

        Ok(Self {
            config,
            store,
            index,
            embedder,
            retriever: Retriever::new(tiers),
            autosave,
            cache: EmbeddingCache::new(),
        })
    }

    /// Stop the autosave timer and flush pending records.
    ///
    /// Returns how many records were written to the delta log.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(self) -> Result<usize> {
        let flushed = self.autosave.shutdown()?;
        info!(flushed, "Knowledge base closed");
        Ok(flushed)
    }

    #[must_use]
    pub fn config(&self) -> &KbConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[must_use]
    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    #[must_use]
    pub fn pending_autosave(&self) -> usize {
        self.autosave.pending_len()
    }

    /// Similarity search through the tier chain. Never fails.
    pub async fn search(&self, query: &str, k: usize, prefer_remote: bool) -> Vec<SearchHit> {
        self.retriever.search(query, k, prefer_remote).await
    }

    /// Add or replace one record.
    ///
    /// A missing embedding is reused from the store when the reaction and
    /// description are unchanged, otherwise computed. The record is
    /// upserted, folded into the index when it has an embedding, and queued
    /// for the delta log. An index failure is logged, not returned: the
    /// record stays searchable by keyword and the next build picks it up.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid record or a failed store write.
    pub async fn add_record(&self, record: DiagramRecord) -> Result<AddOutcome> {
        record.validate(self.config.dimension)?;
        let (record, source) = self.with_embedding(record).await?;

        lock_store(&self.store).upsert(&record)?;

        let indexed = match &record.embedding {
            Some(vector) => match self.index.add_or_update(&record.reaction, vector) {
                Ok(_) => true,
                Err(e) => {
                    warn!(reaction = %record.reaction, error = %e, "Failed to update vector index");
                    false
                }
            },
            None => false,
        };

        let outcome = AddOutcome {
            reaction: record.reaction.clone(),
            embedding: source,
            indexed,
        };
        self.autosave.enqueue(record);
        Ok(outcome)
    }

    async fn with_embedding(
        &self,
        mut record: DiagramRecord,
    ) -> Result<(DiagramRecord, EmbeddingSource)> {
        if record.embedding.is_some() {
            return Ok((record, EmbeddingSource::Provided));
        }

        let reused = reusable_embedding(&lock_store(&self.store), &record, self.config.dimension)?;
        if let Some(vector) = reused {
            record.embedding = Some(vector);
            return Ok((record, EmbeddingSource::Reused));
        }

        match self
            .embedder
            .embed(record.embedding_text(), TaskType::Document)
            .await
        {
            Some(vector) => {
                record.embedding = Some(vector);
                Ok((record, EmbeddingSource::Computed))
            }
            None => Ok((record, EmbeddingSource::Missing)),
        }
    }

    /// Import a JSON array of records, then rebuild the index.
    ///
    /// Elements without a reaction are skipped. No embeddings are computed
    /// here; run [`Self::backfill_embeddings`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is not a JSON array or a store write
    /// or index build fails.
    pub fn import_file(&self, path: &Path) -> Result<ImportReport> {
        let batch = read_records(path)?;
        let (imported, reused_embeddings) = self.upsert_reusing(batch.records)?;
        let index = self.rebuild_index()?;

        info!(imported, skipped = batch.skipped, "Imported records");
        Ok(ImportReport {
            imported,
            skipped: batch.skipped,
            reused_embeddings,
            index,
        })
    }

    /// Fold the delta log into the store, rebuild the index and reset the
    /// log to an empty array.
    ///
    /// Pending autosave records are flushed first.
    ///
    /// # Errors
    ///
    /// Returns an error if a flush, store write, build or log write fails.
    /// The log is only reset after the store and index are updated.
    pub fn fold_delta(&self) -> Result<FoldReport> {
        self.autosave.flush()?;

        let path = self.config.delta_path();
        let records = read_delta(&path);
        if records.is_empty() {
            return Ok(FoldReport::default());
        }

        let (folded, _) = self.upsert_reusing(records)?;
        let index = self.rebuild_index()?;
        write_delta(&path, &[])?;

        info!(folded, indexed = index.indexed, "Folded delta log");
        Ok(FoldReport { folded, index })
    }

    /// Upsert a batch in one transaction, reusing stored embeddings whose
    /// fingerprint still matches.
    fn upsert_reusing(&self, records: Vec<DiagramRecord>) -> Result<(usize, usize)> {
        let dimension = self.config.dimension;
        let mut store = lock_store(&self.store);

        let mut reused = 0;
        let mut prepared = Vec::with_capacity(records.len());
        for mut record in records {
            if record.embedding.is_none() {
                if let Some(vector) = reusable_embedding(&store, &record, dimension)? {
                    record.embedding = Some(vector);
                    reused += 1;
                }
            }
            prepared.push(record);
        }

        let written = store.upsert_many(&prepared)?;
        Ok((written, reused))
    }

    /// Rebuild the vector index from every embedded record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the build fails.
    pub fn rebuild_index(&self) -> Result<BuildReport> {
        build_from_store(&lock_store(&self.store), &self.index)
    }

    /// Compute embeddings for records that lack a valid one, then rebuild
    /// the index if anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn backfill_embeddings(&self, limit: Option<usize>) -> Result<BackfillReport> {
        let dimension = self.config.dimension;
        let candidates: Vec<(usize, DiagramRecord)> = lock_store(&self.store)
            .all_records()?
            .into_iter()
            .enumerate()
            .filter(|(_, r)| r.embedding.as_ref().is_none_or(|e| e.len() != dimension))
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        let mut report = BackfillReport {
            candidates: candidates.len(),
            ..BackfillReport::default()
        };

        for (position, record) in &candidates {
            let text = record.embedding_text();
            match self.cache.get_or_embed(*position, text, &self.embedder).await {
                Some(vector) => {
                    lock_store(&self.store).set_embedding(&record.reaction, &vector)?;
                    report.embedded += 1;
                }
                None => {
                    debug!(reaction = %record.reaction, "Backfill embedding failed");
                    report.failed += 1;
                }
            }
        }

        if report.embedded > 0 {
            report.index = Some(self.rebuild_index()?);
        }
        info!(
            candidates = report.candidates,
            embedded = report.embedded,
            failed = report.failed,
            "Backfill finished"
        );
        Ok(report)
    }

    /// Embedding coverage of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub fn coverage(&self) -> Result<EmbeddingStats> {
        lock_store(&self.store).embedding_stats(self.config.dimension)
    }

    #[must_use]
    pub fn index_status(&self) -> IndexStatus {
        self.index.status()
    }

    /// # Errors
    ///
    /// Returns an error if the log cannot be hashed.
    pub fn delta_status(&self) -> Result<DeltaStatus> {
        delta_status(&self.config.delta_path())
    }
}

/// The stored embedding for `record.reaction`, if it was computed from the
/// same reaction and description and has the expected dimension.
fn reusable_embedding(
    store: &RecordStore,
    record: &DiagramRecord,
    dimension: usize,
) -> Result<Option<Vec<f32>>> {
    let fingerprint = record.fingerprint();
    Ok(store
        .stored_embedding(&record.reaction)?
        .filter(|stored| {
            stored.vector.len() == dimension && stored.fingerprint.as_deref() == Some(fingerprint.as_str())
        })
        .map(|stored| stored.vector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::chain::test_support::{FakeProvider, embedder_with};
    use crate::retrieval::Tier;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> KbConfig {
        let mut config = KbConfig::for_data_dir(dir.path()).unwrap();
        config.dimension = 2;
        config.autosave.enabled = false;
        config
    }

    fn toy_provider() -> FakeProvider {
        FakeProvider::new("fake")
            .with("a", vec![1.0, 0.0])
            .with("b", vec![0.0, 1.0])
            .with("c", vec![0.9, 0.1])
            .with("along x", vec![1.0, 0.0])
    }

    fn reactions(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.record.reaction.as_str()).collect()
    }

    #[tokio::test]
    async fn test_toy_scenario() {
        let dir = TempDir::new().unwrap();
        let kb = KnowledgeBase::open_with_embedder(config(&dir), embedder_with(toy_provider(), 2))
            .unwrap();

        for id in ["a", "b", "c"] {
            let outcome = kb.add_record(DiagramRecord::new(id, "toy", id)).await.unwrap();
            assert_eq!(outcome.embedding, EmbeddingSource::Computed);
            assert!(outcome.indexed);
        }
        assert_eq!(kb.index().len(), 3);

        let hits = kb.search("along x", 2, true).await;
        assert_eq!(reactions(&hits), vec!["a", "c"]);
        assert!(hits.iter().all(|h| h.tier == Tier::Vector));
    }

    #[tokio::test]
    async fn test_embedding_reused_until_description_changes() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::new("fake").always(vec![0.6, 0.8]);
        let calls = Arc::clone(&provider.calls);
        let kb = KnowledgeBase::open_with_embedder(config(&dir), embedder_with(provider, 2)).unwrap();

        kb.add_record(DiagramRecord::new("r", "t", "first")).await.unwrap();
        let again = kb.add_record(DiagramRecord::new("r", "other topic", "first")).await.unwrap();
        assert_eq!(again.embedding, EmbeddingSource::Reused);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let changed = kb.add_record(DiagramRecord::new("r", "t", "second")).await.unwrap();
        assert_eq!(changed.embedding, EmbeddingSource::Computed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(kb.index().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_keyword_when_embedding_fails() {
        let dir = TempDir::new().unwrap();
        let kb = KnowledgeBase::open_with_embedder(
            config(&dir),
            embedder_with(FakeProvider::new("down").failing(), 2),
        )
        .unwrap();

        let outcome = kb
            .add_record(DiagramRecord::new("e+ e- -> mu+ mu-", "QED", "Muon pair production"))
            .await
            .unwrap();
        assert_eq!(outcome.embedding, EmbeddingSource::Missing);
        assert!(!outcome.indexed);

        let hits = kb.search("muon", 5, true).await;
        assert_eq!(reactions(&hits), vec!["e+ e- -> mu+ mu-"]);
        assert_eq!(hits[0].tier, Tier::Keyword);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension() {
        let dir = TempDir::new().unwrap();
        let kb = KnowledgeBase::open_with_embedder(config(&dir), Embedder::disabled(2)).unwrap();
        let record = DiagramRecord::new("r", "t", "d").with_embedding(vec![1.0, 0.0, 0.0]);
        assert!(kb.add_record(record).await.is_err());
        assert_eq!(kb.coverage().unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_remote_falls_through_to_vector_tier() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.remote.endpoint = Some("http://127.0.0.1:9/search".into());
        config.remote.timeout = std::time::Duration::from_secs(2);
        let kb = KnowledgeBase::open_with_embedder(config, embedder_with(toy_provider(), 2)).unwrap();
        for id in ["a", "b", "c"] {
            kb.add_record(DiagramRecord::new(id, "toy", id)).await.unwrap();
        }

        let hits = kb.search("along x", 2, true).await;
        assert_eq!(reactions(&hits), vec!["a", "c"]);
        assert!(hits.iter().all(|h| h.tier == Tier::Vector));
    }

    #[tokio::test]
    async fn test_non_finite_embeddings_never_block_index_builds() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let kb = KnowledgeBase::open_with_embedder(config.clone(), Embedder::disabled(2)).unwrap();

        let bad = DiagramRecord::new("bad", "t", "d").with_embedding(vec![f32::INFINITY, 0.0]);
        assert!(matches!(
            kb.add_record(bad).await,
            Err(crate::error::Error::InvalidArgument(_))
        ));

        let input = dir.path().join("records.json");
        std::fs::write(
            &input,
            r#"[{"reaction": "a", "embedding": [1.0, 0.0]},
                {"reaction": "huge", "embedding": [1e39, 0.0]}]"#,
        )
        .unwrap();
        let report = kb.import_file(&input).unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.index.indexed, 1);
        let stats = kb.coverage().unwrap();
        assert_eq!((stats.valid, stats.missing), (1, 1));

        // A row that already holds a non-finite vector is skipped on rebuild.
        let conn = rusqlite::Connection::open(config.db_path()).unwrap();
        conn.execute(
            "UPDATE diagrams SET embedding = ?1, embedding_dim = 2 WHERE reaction = 'huge'",
            [crate::storage::encode_embedding(&[f32::NAN, 1.0]).unwrap()],
        )
        .unwrap();
        let rebuilt = kb.rebuild_index().unwrap();
        assert_eq!((rebuilt.indexed, rebuilt.skipped), (1, 1));
        kb.close().unwrap();

        std::fs::remove_file(config.index_path()).unwrap();
        let kb = KnowledgeBase::open_with_embedder(config, Embedder::disabled(2)).unwrap();
        assert_eq!(kb.index().ids(), vec!["a"]);
    }

    #[test]
    fn test_open_builds_missing_index_from_store() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        {
            let mut store = RecordStore::open(&config.db_path()).unwrap();
            store
                .upsert(&DiagramRecord::new("a", "t", "d").with_embedding(vec![1.0, 0.0]))
                .unwrap();
            store.upsert(&DiagramRecord::new("b", "t", "d")).unwrap();
        }
        assert!(!config.index_path().exists());

        let kb = KnowledgeBase::open_with_embedder(config.clone(), Embedder::disabled(2)).unwrap();
        assert_eq!(kb.index().ids(), vec!["a"]);
        assert!(config.index_path().exists());
    }

    #[tokio::test]
    async fn test_close_flushes_delta_log() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let kb = KnowledgeBase::open_with_embedder(config.clone(), Embedder::disabled(2)).unwrap();

        kb.add_record(DiagramRecord::new("a", "t", "d")).await.unwrap();
        assert_eq!(kb.pending_autosave(), 1);
        assert_eq!(kb.close().unwrap(), 1);
        assert_eq!(read_delta(&config.delta_path()).len(), 1);
    }

    #[tokio::test]
    async fn test_fold_delta_imports_and_resets_log() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        write_delta(
            &config.delta_path(),
            &[
                DiagramRecord::new("a", "t", "d").with_embedding(vec![1.0, 0.0]),
                DiagramRecord::new("b", "t", "d"),
            ],
        )
        .unwrap();

        let kb = KnowledgeBase::open_with_embedder(config.clone(), Embedder::disabled(2)).unwrap();
        kb.add_record(DiagramRecord::new("c", "t", "d").with_embedding(vec![0.0, 1.0]))
            .await
            .unwrap();

        let report = kb.fold_delta().unwrap();
        assert_eq!(report.folded, 3);
        assert_eq!(report.index.indexed, 2);
        assert!(read_delta(&config.delta_path()).is_empty());
        assert_eq!(kb.coverage().unwrap().total(), 3);

        assert_eq!(kb.fold_delta().unwrap().folded, 0);
    }

    #[tokio::test]
    async fn test_import_then_backfill() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("records.json");
        std::fs::write(
            &input,
            r#"[{"reaction": "a", "description": "a"},
                {"reaction": "c", "description": "c"},
                {"topic": "no reaction"}]"#,
        )
        .unwrap();

        let kb = KnowledgeBase::open_with_embedder(config(&dir), embedder_with(toy_provider(), 2))
            .unwrap();
        let report = kb.import_file(&input).unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.index.indexed, 0);
        assert!((kb.coverage().unwrap().coverage() - 0.0).abs() < f64::EPSILON);

        let backfill = kb.backfill_embeddings(None).await.unwrap();
        assert_eq!(backfill.candidates, 2);
        assert_eq!(backfill.embedded, 2);
        assert_eq!(backfill.index.unwrap().indexed, 2);
        assert!((kb.coverage().unwrap().coverage() - 1.0).abs() < f64::EPSILON);

        let hits = kb.search("along x", 1, false).await;
        assert_eq!(reactions(&hits), vec!["a"]);
    }
}
