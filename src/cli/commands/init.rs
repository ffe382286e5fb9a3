//! Initialize a knowledge base.
//!
//! Creates the data directory and the SQLite record store. The index pair
//! and delta log are created on first write. Running it again is harmless.

use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use crate::error::Result;
use crate::storage::RecordStore;

use super::{load_config, print_json};

#[derive(Serialize)]
struct InitOutput {
    data_dir: PathBuf,
    database: PathBuf,
    index: PathBuf,
    id_map: PathBuf,
    delta_log: PathBuf,
    records: usize,
    created: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub fn execute(data_dir: Option<&PathBuf>, json: bool) -> Result<()> {
    let config = load_config(data_dir)?;
    let db_path = config.db_path();
    let created = !db_path.exists();

    fs::create_dir_all(&config.data_dir)?;
    let store = RecordStore::open(&db_path)?;

    let output = InitOutput {
        data_dir: config.data_dir.clone(),
        database: db_path,
        index: config.index_path(),
        id_map: config.id_map_path(),
        delta_log: config.delta_path(),
        records: store.count()?,
        created,
    };

    if json {
        return print_json(&output);
    }

    if created {
        println!("Initialized knowledge base at {}", output.data_dir.display());
    } else {
        println!(
            "Knowledge base already initialized at {} ({} records)",
            output.data_dir.display(),
            output.records
        );
    }
    println!("  Database:  {}", output.database.display());
    println!("  Index:     {}", output.index.display());
    println!("  Id map:    {}", output.id_map.display());
    println!("  Delta log: {}", output.delta_log.display());
    Ok(())
}
