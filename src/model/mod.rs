//! Data models for FeynKB.

pub mod record;

pub use record::{DiagramRecord, check_finite, embedding_fingerprint, is_finite};
