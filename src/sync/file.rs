//! Atomic file operations.
//!
//! Every persisted artifact (index blob, id map, delta log) is replaced, never
//! edited in place: content goes to a sibling `.tmp` file, is flushed and
//! fsynced, and only then renamed over the target. A crash leaves either the
//! old file or the new one, plus possibly a stale `.tmp`.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Sibling temp path: `feynman_kb.ann` -> `feynman_kb.ann.tmp`.
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write bytes produced by `fill` to the temp sibling of `path` and fsync it.
///
/// The target itself is untouched; pair with [`commit_temp`].
///
/// # Errors
///
/// Returns an error if the directory, file or write fails.
pub fn write_temp<F>(path: &Path, fill: F) -> Result<PathBuf>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp = temp_path(path);
    let file = File::create(&temp)?;
    let mut writer = BufWriter::new(file);
    fill(&mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(temp)
}

/// Rename a temp file written by [`write_temp`] over its target.
///
/// # Errors
///
/// Returns an error if the rename fails.
pub fn commit_temp(temp: &Path, path: &Path) -> Result<()> {
    fs::rename(temp, path)?;
    Ok(())
}

/// Write content to a file atomically.
///
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp = write_temp(path, |w| {
        w.write_all(content)?;
        Ok(())
    })?;
    commit_temp(&temp, path)
}

/// Remove a file, treating "already gone" as success.
///
/// Returns whether a file was removed.
///
/// # Errors
///
/// Returns any other I/O error.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Get the size of a file in bytes.
///
/// Returns 0 if the file doesn't exist.
#[must_use]
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("delta.json");

        atomic_write(&path, b"[]").unwrap();
        atomic_write(&path, b"[1]").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[1]");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_write_temp_leaves_target_alone() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("feynman_kb.ann");
        fs::write(&path, b"old").unwrap();

        let temp = write_temp(&path, |w| {
            w.write_all(b"new")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(temp, temp_dir.path().join("feynman_kb.ann.tmp"));
        assert_eq!(fs::read(&path).unwrap(), b"old");

        commit_temp(&temp, &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_remove_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone");
        assert!(!remove_if_exists(&path).unwrap());
        fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert_eq!(file_size(&path), 0);
    }
}
