//! Command implementations.

pub mod add;
pub mod completions;
pub mod delta;
pub mod embeddings;
pub mod import;
pub mod index;
pub mod init;
pub mod search;
pub mod version;

use std::path::PathBuf;

use crate::config::KbConfig;
use crate::error::{Error, Result};
use crate::kb::KnowledgeBase;

/// Resolve configuration, honoring `--data-dir`.
pub(crate) fn load_config(data_dir: Option<&PathBuf>) -> Result<KbConfig> {
    KbConfig::load(data_dir.map(PathBuf::as_path))
}

/// Open an initialized knowledge base.
///
/// # Errors
///
/// Returns `NotInitialized` when the record store does not exist yet.
pub(crate) fn open_kb(config: KbConfig) -> Result<KnowledgeBase> {
    let db_path = config.db_path();
    if !db_path.exists() {
        return Err(Error::NotInitialized { path: db_path });
    }
    KnowledgeBase::open(config)
}

/// Create the tokio runtime commands run their async work on.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))
}

/// Print `value` as one line of JSON.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
