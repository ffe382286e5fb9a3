//! Delta log command implementation.

use colored::Colorize;
use std::path::PathBuf;

use crate::cli::DeltaCommands;
use crate::error::Result;

use super::{load_config, open_kb, print_json};

/// Execute delta commands.
///
/// # Errors
///
/// Returns an error if the knowledge base cannot be opened or the fold
/// fails.
pub fn execute(command: &DeltaCommands, data_dir: Option<&PathBuf>, json: bool) -> Result<()> {
    let kb = open_kb(load_config(data_dir)?)?;

    match command {
        DeltaCommands::Status => {
            let status = kb.delta_status()?;
            kb.close()?;
            if json {
                return print_json(&status);
            }
            println!("Delta Log");
            println!("=========");
            println!("  Path:    {}", status.path.display());
            if status.exists {
                println!("  Records: {}", status.records);
                println!("  Size:    {} bytes", status.bytes);
                if let Some(hash) = &status.content_hash {
                    println!("  Hash:    {}", &hash[..hash.len().min(12)]);
                }
            } else {
                println!("  {}", "(not created yet)".dimmed());
            }
        }
        DeltaCommands::Fold => {
            let report = kb.fold_delta()?;
            kb.close()?;
            if json {
                return print_json(&report);
            }
            if report.folded == 0 {
                println!("Delta log is empty; nothing to fold.");
            } else {
                println!("{} {} records", "Folded".green(), report.folded);
                println!("  Indexed: {}", report.index.indexed);
            }
        }
    }
    Ok(())
}
