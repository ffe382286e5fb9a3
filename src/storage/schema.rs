//! Database schema definitions.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the record store.
///
/// `seq` preserves dataset (first insertion) order: upserts update in
/// place and never reassign it. Timestamps are Unix milliseconds.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS diagrams (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    reaction TEXT NOT NULL UNIQUE,
    topic TEXT NOT NULL DEFAULT '',
    particles TEXT NOT NULL DEFAULT '[]',
    description TEXT NOT NULL DEFAULT '',
    tikz TEXT NOT NULL DEFAULT '',
    process_type TEXT NOT NULL DEFAULT '',
    source TEXT,
    embedding BLOB,
    embedding_dim INTEGER,
    embedding_fingerprint TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_diagrams_embedding_dim ON diagrams(embedding_dim);
";

/// Apply pragmas and the schema to a connection.
///
/// # Errors
///
/// Returns an error if a pragma or statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
