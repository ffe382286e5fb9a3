//! Error types for FeynKB.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, etc.)
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers
//!
//! Query-time callers never see these: the retriever recovers every
//! failure locally. They surface only from operator commands (import,
//! index build, backfill) and from the library's fallible building blocks.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for FeynKB operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    DatabaseError,

    // Not Found (exit 3)
    RecordNotFound,

    // Validation (exit 4)
    InvalidArgument,
    DimensionMismatch,

    // Index (exit 5)
    IndexInconsistent,
    IndexError,

    // Remote (exit 6)
    RemoteError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Embedding (exit 9)
    EmbeddingError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::RecordNotFound => "RECORD_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DimensionMismatch => "DIMENSION_MISMATCH",
            Self::IndexInconsistent => "INDEX_INCONSISTENT",
            Self::IndexError => "INDEX_ERROR",
            Self::RemoteError => "REMOTE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::EmbeddingError => "EMBEDDING_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::DatabaseError => 2,
            Self::RecordNotFound => 3,
            Self::InvalidArgument | Self::DimensionMismatch => 4,
            Self::IndexInconsistent | Self::IndexError => 5,
            Self::RemoteError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::EmbeddingError => 9,
        }
    }

    /// Whether retrying the same operation can plausibly succeed.
    ///
    /// True for transient provider and service failures and for
    /// database lock contention.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteError | Self::EmbeddingError | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in FeynKB operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: no knowledge base at {path}")]
    NotInitialized { path: PathBuf },

    #[error("Record not found: {reaction}")]
    RecordNotFound { reaction: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index inconsistent: {items} items but {ids} ids")]
    IndexInconsistent { items: usize, ids: usize },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Remote search error: {0}")]
    Remote(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding coverage {coverage:.3} is below the minimum {minimum:.3}")]
    CoverageBelowMinimum { coverage: f64, minimum: f64 },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized { .. } => ErrorCode::NotInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            Self::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            Self::IndexInconsistent { .. } => ErrorCode::IndexInconsistent,
            Self::Index(_) => ErrorCode::IndexError,
            Self::Remote(_) => ErrorCode::RemoteError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Embedding(_) | Self::CoverageBelowMinimum { .. } => ErrorCode::EmbeddingError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint for operators.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized { path } => Some(format!(
                "Run `fkb init` (or pass --data-dir) to create a knowledge base at {}",
                path.display()
            )),
            Self::RecordNotFound { reaction } => Some(format!(
                "No record with reaction '{reaction}'. Use `fkb search` to look for similar ones."
            )),
            Self::DimensionMismatch { expected, .. } => Some(format!(
                "The knowledge base uses {expected}-dimensional embeddings. \
                 Check FKB_EMBEDDING_DIM and the configured embedding model."
            )),
            Self::IndexInconsistent { .. } | Self::Index(_) => {
                Some("Rebuild the vector index with `fkb index build`".to_string())
            }
            Self::Embedding(_) => Some(
                "Check GOOGLE_API_KEY, or start Ollama (`ollama serve`). \
                 `fkb embeddings status` shows which providers are reachable."
                    .to_string(),
            ),
            Self::CoverageBelowMinimum { .. } => Some(
                "Run `fkb embeddings backfill` to embed the remaining records".to_string(),
            ),
            Self::Remote(_) => Some(
                "Check FKB_REMOTE_ENDPOINT / FKB_REMOTE_TOKEN, or search with --local-only"
                    .to_string(),
            ),
            Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(Error::Index("x".into()).exit_code(), 5);
        assert_eq!(Error::Remote("x".into()).exit_code(), 6);
        assert_eq!(Error::Embedding("x".into()).exit_code(), 9);
        assert_eq!(
            Error::DimensionMismatch { expected: 768, actual: 3 }.exit_code(),
            4
        );
    }

    #[test]
    fn test_structured_json_includes_hint() {
        let err = Error::IndexInconsistent { items: 3, ids: 2 };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "INDEX_INCONSISTENT");
        assert_eq!(json["error"]["retryable"], false);
        assert!(json["error"]["hint"].as_str().unwrap().contains("fkb index build"));
    }

    #[test]
    fn test_structured_json_without_hint() {
        let err = Error::Other("boom".into());
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
        assert!(json["error"].get("hint").is_none());
    }
}
