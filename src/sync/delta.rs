//! The delta log: records added since the last fold, as a JSON array.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::file::{atomic_write, file_size};
use super::hash::content_hash;
use super::import::read_records;
use crate::error::Result;
use crate::model::DiagramRecord;

/// Read the delta log tolerantly.
///
/// A missing file is empty. A file that cannot be read or is not a JSON
/// array is logged and treated as empty.
#[must_use]
pub fn read_delta(path: &Path) -> Vec<DiagramRecord> {
    if !path.exists() {
        return Vec::new();
    }
    match read_records(path) {
        Ok(batch) => batch.records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable delta log; treating as empty");
            Vec::new()
        }
    }
}

/// Replace the delta log with `records` as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if serialization or the atomic write fails.
pub fn write_delta(path: &Path, records: &[DiagramRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    atomic_write(path, json.as_bytes())
}

/// Delta log summary for `fkb delta status`.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub records: usize,
    pub bytes: u64,
    pub content_hash: Option<String>,
}

/// Summarize the delta log at `path`.
///
/// # Errors
///
/// Returns an error if the records cannot be hashed.
pub fn delta_status(path: &Path) -> Result<DeltaStatus> {
    let exists = path.exists();
    let records = read_delta(path);
    let content_hash = if exists {
        Some(content_hash(&records)?)
    } else {
        None
    };
    Ok(DeltaStatus {
        path: path.to_path_buf(),
        exists,
        records: records.len(),
        bytes: file_size(path),
        content_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_and_corrupt_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feynman_kb_user.json");
        assert!(read_delta(&path).is_empty());

        fs::write(&path, "{ not json").unwrap();
        assert!(read_delta(&path).is_empty());

        fs::write(&path, r#"{"reaction": "x"}"#).unwrap();
        assert!(read_delta(&path).is_empty());
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feynman_kb_user.json");
        let records = vec![DiagramRecord::new("a", "t", "d"), DiagramRecord::new("b", "t", "")];

        write_delta(&path, &records).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  {"));
        assert!(!text.contains("embedding"));
        assert_eq!(read_delta(&path), records);

        let status = delta_status(&path).unwrap();
        assert!(status.exists);
        assert_eq!(status.records, 2);
        assert!(status.bytes > 0);
        assert!(status.content_hash.is_some());
    }
}
