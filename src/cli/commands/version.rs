//! Version command implementation.

use crate::error::Result;
use crate::index::ForestParams;
use serde::Serialize;

use super::print_json;

#[derive(Serialize)]
struct VersionOutput<'a> {
    version: &'a str,
    build: &'a str,
    index_trees: usize,
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    let build = if cfg!(debug_assertions) {
        "dev"
    } else {
        "release"
    };

    if json {
        return print_json(&VersionOutput {
            version,
            build,
            index_trees: ForestParams::default().n_trees,
        });
    }

    println!("fkb version {version} ({build})");
    Ok(())
}
