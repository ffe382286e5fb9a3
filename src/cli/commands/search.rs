//! Search command implementation.

use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::SearchArgs;
use crate::error::Result;
use crate::retrieval::SearchHit;

use super::{load_config, open_kb, print_json, runtime};

#[derive(Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    k: usize,
    count: usize,
    results: &'a [SearchHit],
}

/// Execute the search command.
///
/// An empty result is not an error.
///
/// # Errors
///
/// Returns an error if the knowledge base cannot be opened.
pub fn execute(args: &SearchArgs, data_dir: Option<&PathBuf>, json: bool) -> Result<()> {
    let kb = open_kb(load_config(data_dir)?)?;
    let rt = runtime()?;
    let hits = rt.block_on(kb.search(&args.query, args.k, !args.local_only));
    kb.close()?;

    if json {
        return print_json(&SearchOutput {
            query: &args.query,
            k: args.k,
            count: hits.len(),
            results: &hits,
        });
    }

    if hits.is_empty() {
        println!("No matching diagrams for \"{}\".", args.query);
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        let score = hit
            .score
            .map(|s| format!(" {s:.3}"))
            .unwrap_or_default();
        println!(
            "{}. {} {}",
            rank + 1,
            hit.record.reaction.bold(),
            format!("[{}{score}]", hit.tier).dimmed()
        );
        println!("   {} {}", hit.record.topic.cyan(), hit.record.process_type.dimmed());
        if !hit.record.description.is_empty() {
            println!("   {}", truncate(&hit.record.description, 100));
        }
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
