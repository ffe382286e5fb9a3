//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::retrieval::DEFAULT_K;

pub mod commands;

/// FeynKB - retrieval and indexing for TikZ Feynman-diagram exemplars
#[derive(Parser, Debug)]
#[command(name = "fkb", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory (default: ~/.feynkb/data)
    #[arg(long, global = true, env = "FKB_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output as JSON (for agent integration)
    #[arg(long, alias = "robot", global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory and record store
    Init,

    /// Print version information
    Version,

    /// Search for similar diagrams
    Search(SearchArgs),

    /// Add or replace a diagram record
    Add(AddArgs),

    /// Import a JSON array of records and rebuild the index
    Import {
        /// Path to the JSON file
        file: PathBuf,
    },

    /// Vector index management
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },

    /// Embedding providers and coverage
    Embeddings {
        #[command(subcommand)]
        command: EmbeddingsCommands,
    },

    /// Delta log (records added since the last fold)
    Delta {
        #[command(subcommand)]
        command: DeltaCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Free-text query (reaction, process or description)
    pub query: String,

    /// Maximum results to return
    #[arg(short, long, default_value_t = DEFAULT_K)]
    pub k: usize,

    /// Skip the remote search service
    #[arg(long)]
    pub local_only: bool,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Reaction, the record's unique key (e.g. "e+ e- -> mu+ mu-")
    #[arg(long)]
    pub reaction: String,

    /// Short label
    #[arg(long, default_value = "N/A")]
    pub topic: String,

    /// Description used for the embedding
    #[arg(short, long, default_value = "")]
    pub description: String,

    /// TikZ source of the diagram
    #[arg(long, default_value = "")]
    pub tikz: String,

    /// Particles, comma-separated
    #[arg(long, value_delimiter = ',')]
    pub particles: Vec<String>,

    /// Coarse process category
    #[arg(long, default_value = "N/A")]
    pub process_type: String,

    /// Provenance
    #[arg(long)]
    pub source: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IndexCommands {
    /// Rebuild the index from every embedded record
    Build,

    /// Show index size and files
    Status,
}

#[derive(Subcommand, Debug, Clone)]
pub enum EmbeddingsCommands {
    /// Show provider availability and configuration
    Status,

    /// Embed a sample text with the provider chain
    Test {
        /// Text to embed
        text: String,
    },

    /// Compute embeddings for records that lack one
    Backfill {
        /// Maximum records to process
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Report embedding coverage; fails below the minimum ratio
    Coverage {
        /// Minimum share of records with a valid embedding
        #[arg(long, default_value_t = 0.9)]
        min_ratio: f64,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum DeltaCommands {
    /// Show the delta log size and pending records
    Status,

    /// Import the delta log into the store, rebuild the index, reset the log
    Fold,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search() {
        let cli = Cli::parse_from(["fkb", "search", "muon pair", "-k", "3", "--local-only"]);
        let Commands::Search(args) = cli.command else {
            panic!("expected search");
        };
        assert_eq!(args.query, "muon pair");
        assert_eq!(args.k, 3);
        assert!(args.local_only);
    }

    #[test]
    fn test_parse_add_particles() {
        let cli = Cli::parse_from([
            "fkb",
            "add",
            "--reaction",
            "e+ e- -> mu+ mu-",
            "--particles",
            "e+,e-,mu+,mu-",
            "--json",
        ]);
        assert!(cli.json);
        let Commands::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.particles.len(), 4);
        assert_eq!(args.topic, "N/A");
    }
}
