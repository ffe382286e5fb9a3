//! SQLite record store.
//!
//! One row per `DiagramRecord`, keyed by `reaction`. Embeddings are stored
//! as length-prefixed blobs (see [`super::codec`]) next to their dimension
//! and the fingerprint of the `(reaction, description)` pair they were
//! computed from.

use crate::error::{Error, Result};
use crate::model::{DiagramRecord, check_finite, embedding_fingerprint};
use crate::storage::codec::{decode_embedding, encode_embedding};
use crate::storage::schema::apply_schema;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const RECORD_COLUMNS: &str =
    "reaction, topic, particles, description, tikz, process_type, source, embedding";

/// SQLite-based record store.
#[derive(Debug)]
pub struct RecordStore {
    conn: Connection,
}

/// Embedding coverage counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct EmbeddingStats {
    /// Records whose embedding has the expected dimension.
    pub valid: usize,
    /// Records with an embedding of some other dimension.
    pub wrong_dimension: usize,
    /// Records without an embedding.
    pub missing: usize,
}

impl EmbeddingStats {
    #[must_use]
    pub fn total(&self) -> usize {
        self.valid + self.wrong_dimension + self.missing
    }

    /// Share of records with a valid embedding (1.0 for an empty store).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => self.valid as f64 / total as f64,
        }
    }
}

/// A stored embedding and the fingerprint it was computed under.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub vector: Vec<f32>,
    pub fingerprint: Option<String>,
}

impl RecordStore {
    /// Open a database at the given path, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(timeout_ms.map_or(Duration::from_secs(5), Duration::from_millis))?;

        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on success.
    fn transaction<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // ======================
    // Writes
    // ======================

    /// Insert or replace the record keyed by `record.reaction`.
    ///
    /// Every field, the embedding included, is overwritten. The row keeps
    /// its dataset position.
    ///
    /// # Errors
    ///
    /// Returns an error if the reaction is blank or the write fails.
    pub fn upsert(&mut self, record: &DiagramRecord) -> Result<()> {
        self.transaction(|tx| upsert_in(tx, record))
    }

    /// Upsert many records in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error (and writes nothing) if any record fails.
    pub fn upsert_many(&mut self, records: &[DiagramRecord]) -> Result<usize> {
        self.transaction(|tx| {
            for record in records {
                upsert_in(tx, record)?;
            }
            Ok(records.len())
        })
    }

    /// Attach an embedding to an existing record, fingerprinting it against
    /// the record's current description.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if no record has that reaction.
    pub fn set_embedding(&mut self, reaction: &str, embedding: &[f32]) -> Result<()> {
        check_finite(embedding)?;
        let blob = encode_embedding(embedding)?;
        self.transaction(|tx| {
            let description: Option<String> = tx
                .query_row(
                    "SELECT description FROM diagrams WHERE reaction = ?1",
                    [reaction],
                    |row| row.get(0),
                )
                .optional()?;
            let description = description.ok_or_else(|| Error::RecordNotFound {
                reaction: reaction.to_string(),
            })?;

            tx.execute(
                "UPDATE diagrams SET embedding = ?1, embedding_dim = ?2,
                   embedding_fingerprint = ?3, updated_at = ?4
                 WHERE reaction = ?5",
                rusqlite::params![
                    blob,
                    embedding.len(),
                    embedding_fingerprint(reaction, &description),
                    chrono::Utc::now().timestamp_millis(),
                    reaction,
                ],
            )?;
            Ok(())
        })
    }

    // ======================
    // Reads
    // ======================

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM diagrams", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Get a record by reaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, reaction: &str) -> Result<Option<DiagramRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM diagrams WHERE reaction = ?1"),
                [reaction],
                map_record_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Fetch records in the order of `ids`.
    ///
    /// Unknown ids are skipped and logged; they never fail the call, so a
    /// ranked id list hydrates to a ranked record list.
    ///
    /// # Errors
    ///
    /// Returns an error only if the database itself fails.
    pub fn get_by_ids(&self, ids: &[String]) -> Result<Vec<DiagramRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {RECORD_COLUMNS} FROM diagrams WHERE reaction = ?1"))?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match stmt.query_row([id], map_record_row).optional()? {
                Some(record) => records.push(record),
                None => warn!(reaction = %id, "id not found in record store; skipping"),
            }
        }
        Ok(records)
    }

    /// Stored embedding for `reaction`, with its fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stored_embedding(&self, reaction: &str) -> Result<Option<StoredEmbedding>> {
        let row: Option<(Vec<u8>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT embedding, embedding_fingerprint FROM diagrams
                 WHERE reaction = ?1 AND embedding IS NOT NULL",
                [reaction],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(blob, fingerprint)| {
            decode_or_warn(reaction, &blob).map(|vector| StoredEmbedding {
                vector,
                fingerprint,
            })
        }))
    }

    /// Case-insensitive substring match over reaction, topic and
    /// description, in dataset order, at most `limit` records.
    ///
    /// A blank needle matches nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn query_by_substring(&self, text: &str, limit: usize) -> Result<Vec<DiagramRecord>> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {RECORD_COLUMNS} FROM diagrams ORDER BY seq ASC"))?;
        let mut rows = stmt.query([])?;

        let mut matches = Vec::new();
        while let Some(row) = rows.next()? {
            let record = map_record_row(row)?;
            let hit = [&record.reaction, &record.topic, &record.description]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if hit {
                matches.push(record);
                if matches.len() == limit {
                    break;
                }
            }
        }
        Ok(matches)
    }

    /// `(reaction, embedding)` for every embedded record, in dataset order.
    ///
    /// Blobs that fail to decode are skipped and logged. Dimension is not
    /// checked here.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn records_with_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT reaction, embedding FROM diagrams
             WHERE embedding IS NOT NULL
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (reaction, blob) = row?;
            if let Some(vector) = decode_or_warn(&reaction, &blob) {
                out.push((reaction, vector));
            }
        }
        Ok(out)
    }

    /// Records lacking a valid embedding of `dimension`, in dataset order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn records_without_embeddings(
        &self,
        dimension: usize,
        limit: Option<usize>,
    ) -> Result<Vec<DiagramRecord>> {
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM diagrams
             WHERE embedding IS NULL OR embedding_dim IS NOT ?1
             ORDER BY seq ASC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(rusqlite::params![dimension, limit], map_record_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// All records in dataset order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn all_records(&self) -> Result<Vec<DiagramRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {RECORD_COLUMNS} FROM diagrams ORDER BY seq ASC"))?;
        let rows = stmt.query_map([], map_record_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Count records by embedding state for the expected `dimension`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn embedding_stats(&self, dimension: usize) -> Result<EmbeddingStats> {
        let (valid, wrong, missing): (i64, i64, i64) = self.conn.query_row(
            "SELECT
               COALESCE(SUM(CASE WHEN embedding IS NOT NULL AND embedding_dim = ?1 THEN 1 ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN embedding IS NOT NULL AND embedding_dim IS NOT ?1 THEN 1 ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN embedding IS NULL THEN 1 ELSE 0 END), 0)
             FROM diagrams",
            [dimension],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let to_usize = |n: i64| usize::try_from(n).unwrap_or_default();
        Ok(EmbeddingStats {
            valid: to_usize(valid),
            wrong_dimension: to_usize(wrong),
            missing: to_usize(missing),
        })
    }
}

fn upsert_in(tx: &Transaction, record: &DiagramRecord) -> Result<()> {
    if record.reaction.trim().is_empty() {
        return Err(Error::InvalidArgument("reaction must not be empty".into()));
    }

    let now = chrono::Utc::now().timestamp_millis();
    if let Some(embedding) = &record.embedding {
        check_finite(embedding)?;
    }

    let particles = serde_json::to_string(&record.particles)?;
    let (blob, dim, fingerprint) = match &record.embedding {
        Some(embedding) => (
            Some(encode_embedding(embedding)?),
            Some(embedding.len()),
            Some(record.fingerprint()),
        ),
        None => (None, None, None),
    };

    tx.execute(
        "INSERT INTO diagrams (reaction, topic, particles, description, tikz, process_type, source,
                               embedding, embedding_dim, embedding_fingerprint, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
         ON CONFLICT(reaction) DO UPDATE SET
           topic = excluded.topic,
           particles = excluded.particles,
           description = excluded.description,
           tikz = excluded.tikz,
           process_type = excluded.process_type,
           source = excluded.source,
           embedding = excluded.embedding,
           embedding_dim = excluded.embedding_dim,
           embedding_fingerprint = excluded.embedding_fingerprint,
           updated_at = excluded.updated_at",
        rusqlite::params![
            record.reaction,
            record.topic,
            particles,
            record.description,
            record.tikz,
            record.process_type,
            record.source,
            blob,
            dim,
            fingerprint,
            now,
        ],
    )?;
    Ok(())
}

fn map_record_row(row: &Row<'_>) -> rusqlite::Result<DiagramRecord> {
    let reaction: String = row.get(0)?;
    let particles: String = row.get(2)?;
    let blob: Option<Vec<u8>> = row.get(7)?;

    let particles = serde_json::from_str(&particles).unwrap_or_else(|e| {
        warn!(reaction = %reaction, error = %e, "malformed particles column");
        Vec::new()
    });
    let embedding = blob.and_then(|b| decode_or_warn(&reaction, &b));

    Ok(DiagramRecord {
        topic: row.get(1)?,
        particles,
        description: row.get(3)?,
        tikz: row.get(4)?,
        process_type: row.get(5)?,
        source: row.get(6)?,
        embedding,
        reaction,
    })
}

fn decode_or_warn(reaction: &str, blob: &[u8]) -> Option<Vec<f32>> {
    match decode_embedding(blob) {
        Ok(vector) => Some(vector),
        Err(e) => {
            warn!(reaction = %reaction, error = %e, "undecodable embedding blob");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(reaction: &str, description: &str) -> DiagramRecord {
        DiagramRecord::new(reaction, "QED", description)
    }

    #[test]
    fn test_open_memory() {
        assert!(RecordStore::open_memory().is_ok());
    }

    #[test]
    fn test_upsert_is_idempotent_by_reaction() {
        let mut store = RecordStore::open_memory().unwrap();
        let mut first = record("e- -> e- gamma", "bremsstrahlung");
        first.particles = vec!["e-".into(), "gamma".into()];
        first.embedding = Some(vec![1.0, 0.0]);
        store.upsert(&first).unwrap();

        let mut second = record("e- -> e- gamma", "photon emission");
        second.tikz = "\\feynmandiagram{}".into();
        store.upsert(&second).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let stored = store.get("e- -> e- gamma").unwrap().unwrap();
        assert_eq!(stored, second);
        assert!(stored.embedding.is_none());
    }

    #[test]
    fn test_upsert_keeps_dataset_order() {
        let mut store = RecordStore::open_memory().unwrap();
        for id in ["a", "b", "c"] {
            store.upsert(&record(id, id)).unwrap();
        }
        store.upsert(&record("a", "updated")).unwrap();

        let order: Vec<String> = store
            .all_records()
            .unwrap()
            .into_iter()
            .map(|r| r.reaction)
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_blank_reaction_is_rejected() {
        let mut store = RecordStore::open_memory().unwrap();
        assert!(store.upsert(&record("  ", "d")).is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_non_finite_embedding_is_rejected() {
        let mut store = RecordStore::open_memory().unwrap();
        let bad = record("a", "d").with_embedding(vec![f32::INFINITY, 0.0]);
        assert!(matches!(store.upsert(&bad), Err(Error::InvalidArgument(_))));
        assert_eq!(store.count().unwrap(), 0);

        store.upsert(&record("a", "d")).unwrap();
        assert!(store.set_embedding("a", &[f32::NAN, 1.0]).is_err());
        assert!(store.get("a").unwrap().unwrap().embedding.is_none());
    }

    #[test]
    fn test_get_by_ids_preserves_order_and_skips_missing() {
        let mut store = RecordStore::open_memory().unwrap();
        for id in ["a", "b", "c"] {
            store.upsert(&record(id, id)).unwrap();
        }

        let ids = vec!["c".to_string(), "zzz".to_string(), "a".to_string()];
        let got: Vec<String> = store
            .get_by_ids(&ids)
            .unwrap()
            .into_iter()
            .map(|r| r.reaction)
            .collect();
        assert_eq!(got, vec!["c", "a"]);
    }

    #[test]
    fn test_query_by_substring_is_case_insensitive() {
        let mut store = RecordStore::open_memory().unwrap();
        store
            .upsert(&record("e- -> e- gamma", "An electron emits a Photon"))
            .unwrap();
        store.upsert(&record("mu- -> e- nu nu", "Muon decay")).unwrap();

        let hits = store.query_by_substring("photon", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reaction, "e- -> e- gamma");

        // Matches on reaction and topic too.
        assert_eq!(store.query_by_substring("MU-", 10).unwrap().len(), 1);
        assert_eq!(store.query_by_substring("qed", 10).unwrap().len(), 2);
    }

    #[test]
    fn test_query_by_substring_limit_and_blank() {
        let mut store = RecordStore::open_memory().unwrap();
        for id in ["a1", "a2", "a3"] {
            store.upsert(&record(id, "annihilation")).unwrap();
        }
        let hits = store.query_by_substring("annihilation", 2).unwrap();
        assert_eq!(
            hits.iter().map(|r| r.reaction.as_str()).collect::<Vec<_>>(),
            vec!["a1", "a2"]
        );
        assert!(store.query_by_substring("   ", 5).unwrap().is_empty());
    }

    #[test]
    fn test_embedding_round_trip_through_store() {
        let mut store = RecordStore::open_memory().unwrap();
        let vector = vec![0.1, -0.2, f32::EPSILON];
        store
            .upsert(&record("a", "d").with_embedding(vector.clone()))
            .unwrap();

        let stored = store.get("a").unwrap().unwrap();
        assert_eq!(stored.embedding, Some(vector.clone()));

        let with = store.records_with_embeddings().unwrap();
        assert_eq!(with, vec![("a".to_string(), vector)]);
    }

    #[test]
    fn test_set_embedding_fingerprints_current_description() {
        let mut store = RecordStore::open_memory().unwrap();
        store.upsert(&record("a", "first")).unwrap();
        store.set_embedding("a", &[1.0, 0.0]).unwrap();

        let stored = store.stored_embedding("a").unwrap().unwrap();
        assert_eq!(stored.vector, vec![1.0, 0.0]);
        assert_eq!(
            stored.fingerprint.as_deref(),
            Some(embedding_fingerprint("a", "first").as_str())
        );

        assert!(matches!(
            store.set_embedding("missing", &[1.0]),
            Err(Error::RecordNotFound { .. })
        ));
    }

    #[test]
    fn test_embedding_stats_and_backfill_candidates() {
        let mut store = RecordStore::open_memory().unwrap();
        store.upsert(&record("a", "d").with_embedding(vec![1.0, 0.0])).unwrap();
        store.upsert(&record("b", "d").with_embedding(vec![1.0, 0.0, 0.0])).unwrap();
        store.upsert(&record("c", "d")).unwrap();
        store.upsert(&record("d", "d")).unwrap();

        let stats = store.embedding_stats(2).unwrap();
        assert_eq!(
            stats,
            EmbeddingStats {
                valid: 1,
                wrong_dimension: 1,
                missing: 2
            }
        );
        assert!((stats.coverage() - 0.25).abs() < f64::EPSILON);

        let pending: Vec<String> = store
            .records_without_embeddings(2, None)
            .unwrap()
            .into_iter()
            .map(|r| r.reaction)
            .collect();
        assert_eq!(pending, vec!["b", "c", "d"]);
        assert_eq!(store.records_without_embeddings(2, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_store_coverage_is_full() {
        let store = RecordStore::open_memory().unwrap();
        assert!((store.embedding_stats(768).unwrap().coverage() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_upsert_many_is_atomic() {
        let mut store = RecordStore::open_memory().unwrap();
        let batch = vec![record("a", "d"), record("", "bad"), record("c", "d")];
        assert!(store.upsert_many(&batch).is_err());
        assert_eq!(store.count().unwrap(), 0);

        let batch = vec![record("a", "d"), record("c", "d")];
        assert_eq!(store.upsert_many(&batch).unwrap(), 2);
    }
}
