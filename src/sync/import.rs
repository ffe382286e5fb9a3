//! Lenient record parsing for batch import and the delta log.
//!
//! Input files come from harvest scripts and hand edits, so fields may be
//! missing. Each array element is parsed on its own: a malformed element is
//! logged and skipped without failing the batch.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{DiagramRecord, is_finite};

/// Placeholder for missing label fields.
pub const NOT_AVAILABLE: &str = "N/A";

/// A record as it may appear in an input file: every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    pub reaction: Option<String>,
    pub topic: Option<String>,
    pub particles: Option<Vec<String>>,
    pub description: Option<String>,
    pub tikz: Option<String>,
    pub process_type: Option<String>,
    pub source: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl RawRecord {
    /// Fill defaults; `None` when the reaction is missing or blank.
    ///
    /// An embedding with NaN or infinite components (such as `1e39`, which
    /// overflows `f32`) is dropped so the record can be backfilled later.
    #[must_use]
    pub fn into_record(self) -> Option<DiagramRecord> {
        let reaction = self.reaction.filter(|r| !r.trim().is_empty())?;
        let embedding = self.embedding.filter(|e| {
            let finite = is_finite(e);
            if !finite {
                warn!(reaction = %reaction, "Dropping embedding with non-finite components");
            }
            finite
        });
        Some(DiagramRecord {
            topic: self.topic.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            reaction,
            particles: self.particles.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            tikz: self.tikz.unwrap_or_default(),
            process_type: self.process_type.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            source: self.source,
            embedding,
        })
    }
}

/// Records parsed from one input, with the count of elements dropped.
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    pub records: Vec<DiagramRecord>,
    pub skipped: usize,
}

/// Parse a JSON array of records.
///
/// # Errors
///
/// Returns an error if the input is not JSON or not an array. Individual
/// elements never fail the batch.
pub fn parse_records(json: &str) -> Result<ParsedBatch> {
    let Value::Array(items) = serde_json::from_str::<Value>(json)? else {
        return Err(Error::InvalidArgument(
            "expected a JSON array of records".into(),
        ));
    };

    let mut batch = ParsedBatch::default();
    for (position, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<RawRecord>(item) {
            Ok(raw) => match raw.into_record() {
                Some(record) => batch.records.push(record),
                None => {
                    warn!(position, "Skipping record without a reaction");
                    batch.skipped += 1;
                }
            },
            Err(e) => {
                warn!(position, error = %e, "Skipping malformed record");
                batch.skipped += 1;
            }
        }
    }
    Ok(batch)
}

/// Read and parse a JSON array of records from a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a JSON array.
pub fn read_records(path: &Path) -> Result<ParsedBatch> {
    let json = std::fs::read_to_string(path)?;
    parse_records(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_skips() {
        let batch = parse_records(
            r#"[
                {"reaction": "e+ e- -> mu+ mu-", "description": "s-channel"},
                {"topic": "no reaction"},
                {"reaction": "   "},
                {"reaction": "bad", "particles": 3},
                {"reaction": "g g -> H", "topic": "Higgs", "particles": ["g", "g", "H"],
                 "process_type": "fusion", "tikz": "\\feynmandiagram{}", "source": "pdg"}
            ]"#,
        )
        .unwrap();

        assert_eq!(batch.skipped, 3);
        assert_eq!(batch.records.len(), 2);

        let first = &batch.records[0];
        assert_eq!(first.topic, "N/A");
        assert_eq!(first.process_type, "N/A");
        assert!(first.particles.is_empty());
        assert_eq!(first.tikz, "");

        let second = &batch.records[1];
        assert_eq!(second.particles, vec!["g", "g", "H"]);
        assert_eq!(second.source.as_deref(), Some("pdg"));
    }

    #[test]
    fn test_non_array_is_error() {
        assert!(parse_records(r#"{"reaction": "x"}"#).is_err());
        assert!(parse_records("not json").is_err());
        assert!(parse_records("[]").unwrap().records.is_empty());
    }

    #[test]
    fn test_embedding_is_carried() {
        let batch = parse_records(r#"[{"reaction": "r", "embedding": [1.0, 0.5]}]"#).unwrap();
        assert_eq!(batch.records[0].embedding, Some(vec![1.0, 0.5]));
    }

    #[test]
    fn test_overflowing_embedding_is_dropped() {
        let batch = parse_records(r#"[{"reaction": "r", "embedding": [1e39, 0.0]}]"#).unwrap();
        assert_eq!(batch.skipped, 0);
        assert_eq!(batch.records[0].reaction, "r");
        assert!(batch.records[0].embedding.is_none());
    }
}
