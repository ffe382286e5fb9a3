//! Index command implementation.

use colored::Colorize;
use std::path::PathBuf;

use crate::cli::IndexCommands;
use crate::error::Result;

use super::{load_config, open_kb, print_json};

/// Execute index commands.
///
/// # Errors
///
/// Returns an error if the knowledge base cannot be opened or the build
/// fails.
pub fn execute(command: &IndexCommands, data_dir: Option<&PathBuf>, json: bool) -> Result<()> {
    let kb = open_kb(load_config(data_dir)?)?;

    match command {
        IndexCommands::Build => {
            let report = kb.rebuild_index()?;
            kb.close()?;
            if json {
                return print_json(&report);
            }
            println!("{} {} records", "Indexed".green(), report.indexed);
            if report.skipped > 0 {
                println!(
                    "  {}",
                    format!("Skipped {} with the wrong dimension", report.skipped).yellow()
                );
            }
        }
        IndexCommands::Status => {
            let status = kb.index_status();
            let coverage = kb.coverage()?;
            kb.close()?;
            if json {
                return print_json(&status);
            }
            println!("Vector Index");
            println!("============");
            println!("  Items:      {}", status.items);
            println!("  Dimension:  {}", status.dimension);
            println!("  Trees:      {} (leaf size {})", status.n_trees, status.leaf_size);
            println!("  Index file: {} ({} bytes)", status.index_path.display(), status.index_bytes);
            println!("  Id map:     {} ({} bytes)", status.id_map_path.display(), status.id_map_bytes);
            if status.items < coverage.valid {
                println!();
                println!(
                    "{} embedded records are not indexed. Run 'fkb index build'.",
                    coverage.valid - status.items
                );
            }
        }
    }
    Ok(())
}
