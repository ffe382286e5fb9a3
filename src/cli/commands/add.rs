//! Add command implementation.

use colored::Colorize;
use std::path::PathBuf;

use crate::cli::AddArgs;
use crate::error::Result;
use crate::kb::EmbeddingSource;
use crate::model::DiagramRecord;

use super::{load_config, open_kb, print_json, runtime};

/// Execute the add command.
///
/// The record is written to the store and index immediately and to the
/// delta log when the knowledge base closes.
///
/// # Errors
///
/// Returns an error for a blank reaction or a failed store write.
pub fn execute(args: &AddArgs, data_dir: Option<&PathBuf>, json: bool) -> Result<()> {
    let record = DiagramRecord {
        topic: args.topic.clone(),
        reaction: args.reaction.clone(),
        particles: args
            .particles
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        description: args.description.clone(),
        tikz: args.tikz.clone(),
        process_type: args.process_type.clone(),
        source: args.source.clone(),
        embedding: None,
    };

    let kb = open_kb(load_config(data_dir)?)?;
    let rt = runtime()?;
    let outcome = rt.block_on(kb.add_record(record))?;
    kb.close()?;

    if json {
        return print_json(&outcome);
    }

    println!("{} {}", "Saved".green(), outcome.reaction.bold());
    match outcome.embedding {
        EmbeddingSource::Missing => println!(
            "  {}",
            "No embedding provider answered; searchable by keyword only.".yellow()
        ),
        source => println!(
            "  Embedding: {source}  Indexed: {}",
            if outcome.indexed { "yes" } else { "no" }
        ),
    }
    Ok(())
}
