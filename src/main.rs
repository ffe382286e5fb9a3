//! Feynman diagram knowledge base CLI entry point.

use clap::Parser;
use fkb::cli::commands;
use fkb::cli::{Cli, Commands};
use fkb::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // Resolve effective JSON mode: --json OR non-TTY stdout
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,reqwest=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let data_dir = cli.data_dir.as_ref();

    match &cli.command {
        Commands::Init => commands::init::execute(data_dir, json),
        Commands::Version => commands::version::execute(json),
        Commands::Search(args) => commands::search::execute(args, data_dir, json),
        Commands::Add(args) => commands::add::execute(args, data_dir, json),
        Commands::Import { file } => commands::import::execute(file, data_dir, json),
        Commands::Index { command } => commands::index::execute(command, data_dir, json),
        Commands::Embeddings { command } => commands::embeddings::execute(command, data_dir, json),
        Commands::Delta { command } => commands::delta::execute(command, data_dir, json),
        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
