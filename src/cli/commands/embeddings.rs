//! Embeddings command implementation.
//!
//! - `status` - Show provider availability and configuration
//! - `test` - Embed a sample text with the provider chain
//! - `backfill` - Generate embeddings for stored records that lack one
//! - `coverage` - Report coverage and fail below a minimum ratio

use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::EmbeddingsCommands;
use crate::config::KbConfig;
use crate::embeddings::{TaskType, create_embedder, detect_available_providers};
use crate::error::{Error, Result};
use crate::storage::{EmbeddingStats, RecordStore};

use super::{load_config, open_kb, print_json, runtime};

/// Output for embeddings status command.
#[derive(Serialize)]
struct StatusOutput {
    enabled: bool,
    dimension: usize,
    local_provider: String,
    chain: Vec<String>,
    available: Vec<String>,
    unavailable: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<EmbeddingStats>,
}

/// Output for embeddings test command.
#[derive(Serialize)]
struct TestOutput {
    provider: String,
    dimensions: usize,
    input_text: String,
    embedding_sample: Vec<f32>,
}

/// Output for coverage command.
#[derive(Serialize)]
struct CoverageOutput {
    #[serde(flatten)]
    stats: EmbeddingStats,
    total: usize,
    coverage: f64,
    min_ratio: f64,
    passed: bool,
}

/// Execute embeddings command.
///
/// # Errors
///
/// Returns an error if the subcommand fails; `coverage` fails when the
/// ratio is below the minimum.
pub fn execute(command: &EmbeddingsCommands, data_dir: Option<&PathBuf>, json: bool) -> Result<()> {
    let config = load_config(data_dir)?;
    let rt = runtime()?;

    match command {
        EmbeddingsCommands::Status => rt.block_on(execute_status(&config, json)),
        EmbeddingsCommands::Test { text } => rt.block_on(execute_test(&config, text, json)),
        EmbeddingsCommands::Backfill { limit } => {
            let kb = open_kb(config)?;
            let report = rt.block_on(kb.backfill_embeddings(*limit))?;
            kb.close()?;

            if json {
                return print_json(&report);
            }
            println!(
                "{} {} of {} records",
                "Embedded".green(),
                report.embedded,
                report.candidates
            );
            if report.failed > 0 {
                println!("  {}", format!("{} failed", report.failed).yellow());
            }
            if let Some(index) = report.index {
                println!("  Indexed: {}", index.indexed);
            }
            Ok(())
        }
        EmbeddingsCommands::Coverage { min_ratio } => execute_coverage(&config, *min_ratio, json),
    }
}

async fn execute_status(config: &KbConfig, json: bool) -> Result<()> {
    let detection = detect_available_providers(&config.embeddings).await;
    let chain = create_embedder(&config.embeddings, config.dimension).provider_names();

    let db_path = config.db_path();
    let stats = if db_path.exists() {
        RecordStore::open(&db_path)
            .ok()
            .and_then(|store| store.embedding_stats(config.dimension).ok())
    } else {
        None
    };

    let output = StatusOutput {
        enabled: config.embeddings.enabled,
        dimension: config.dimension,
        local_provider: config.embeddings.local.to_string(),
        chain,
        available: detection.available,
        unavailable: detection.unavailable,
        stats,
    };

    if json {
        return print_json(&output);
    }

    println!("Embeddings Status");
    println!("=================");
    println!();
    println!("Enabled:        {}", if output.enabled { "yes" } else { "no" });
    println!("Dimension:      {}", output.dimension);
    println!("Local provider: {}", output.local_provider);
    println!();

    println!("Provider chain:");
    if output.chain.is_empty() {
        println!("  (none)");
    }
    for name in &output.chain {
        let status = if output.available.contains(name) {
            "✓".green()
        } else {
            "✗".red()
        };
        println!("  {status} {name}");
    }

    if output.available.is_empty() && output.enabled {
        println!();
        println!("No embedding provider available.");
        println!();
        println!("To enable embeddings:");
        println!("  - Set GOOGLE_API_KEY for Gemini");
        println!("  - Or install Ollama: https://ollama.ai");
    }

    if let Some(ref s) = output.stats {
        println!();
        println!("Record Statistics:");
        println!("  With embeddings:    {}", s.valid);
        println!("  Wrong dimension:    {}", s.wrong_dimension);
        println!("  Without embeddings: {}", s.missing);
        println!("  Total records:      {}", s.total());
        if s.missing + s.wrong_dimension > 0 {
            println!();
            println!("Run 'fkb embeddings backfill' to generate missing embeddings.");
        }
    }
    Ok(())
}

async fn execute_test(config: &KbConfig, text: &str, json: bool) -> Result<()> {
    let embedder = create_embedder(&config.embeddings, config.dimension);
    if !embedder.is_enabled() {
        return Err(Error::Embedding("no embedding provider configured".into()));
    }

    let embedded = embedder.try_embed(text, TaskType::Query).await?;
    let output = TestOutput {
        provider: embedded.provider,
        dimensions: embedded.vector.len(),
        input_text: text.to_string(),
        embedding_sample: embedded.vector.iter().take(5).copied().collect(),
    };

    if json {
        return print_json(&output);
    }

    println!("{} via {}", "Embedding OK".green(), output.provider.bold());
    println!("  Dimensions: {}", output.dimensions);
    println!("  Sample:     {:?}", output.embedding_sample);
    Ok(())
}

fn execute_coverage(config: &KbConfig, min_ratio: f64, json: bool) -> Result<()> {
    if !(0.0..=1.0).contains(&min_ratio) {
        return Err(Error::InvalidArgument(format!(
            "--min-ratio must be between 0 and 1, got {min_ratio}"
        )));
    }

    let kb = open_kb(config.clone())?;
    let stats = kb.coverage()?;
    kb.close()?;

    let coverage = stats.coverage();
    let output = CoverageOutput {
        stats,
        total: stats.total(),
        coverage,
        min_ratio,
        passed: coverage >= min_ratio,
    };

    if json {
        print_json(&output)?;
    } else {
        let line = format!(
            "Embedding coverage: {}/{} ({:.1}%)",
            stats.valid,
            output.total,
            coverage * 100.0
        );
        if output.passed {
            println!("{}", line.green());
        } else {
            println!("{}", line.red());
        }
        if stats.wrong_dimension > 0 {
            println!(
                "  {} records have an embedding of the wrong dimension",
                stats.wrong_dimension
            );
        }
    }

    if output.passed {
        Ok(())
    } else {
        Err(Error::CoverageBelowMinimum {
            coverage,
            minimum: min_ratio,
        })
    }
}
