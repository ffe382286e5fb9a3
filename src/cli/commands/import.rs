//! Import command implementation.

use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::error::Result;

use super::{load_config, open_kb, print_json};

/// Execute the import command.
///
/// # Errors
///
/// Returns an error if the file is not a JSON array of records or the
/// store or index cannot be written.
pub fn execute(file: &Path, data_dir: Option<&PathBuf>, json: bool) -> Result<()> {
    let kb = open_kb(load_config(data_dir)?)?;
    let report = kb.import_file(file)?;
    let coverage = kb.coverage()?;
    kb.close()?;

    if json {
        return print_json(&report);
    }

    println!(
        "{} {} records from {}",
        "Imported".green(),
        report.imported,
        file.display()
    );
    if report.skipped > 0 {
        println!("  Skipped:  {} (no reaction or malformed)", report.skipped);
    }
    println!("  Indexed:  {}", report.index.indexed);
    if coverage.missing > 0 {
        println!();
        println!(
            "{} records have no embedding. Run 'fkb embeddings backfill'.",
            coverage.missing
        );
    }
    Ok(())
}
