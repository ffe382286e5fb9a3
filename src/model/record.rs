//! Diagram exemplar record.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A stored TikZ Feynman-diagram exemplar.
///
/// `reaction` is the primary key. `embedding`, when present, has exactly
/// the knowledge base's dimension D.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramRecord {
    pub topic: String,
    pub reaction: String,
    #[serde(default)]
    pub particles: Vec<String>,
    pub description: String,
    pub tikz: String,
    pub process_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl DiagramRecord {
    /// Create a record with empty optional fields.
    #[must_use]
    pub fn new(reaction: impl Into<String>, topic: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reaction: reaction.into(),
            particles: Vec::new(),
            description: description.into(),
            tikz: String::new(),
            process_type: String::new(),
            source: None,
            embedding: None,
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Text the embedding is computed from: the description, or the
    /// reaction when the description is blank.
    #[must_use]
    pub fn embedding_text(&self) -> &str {
        if self.description.trim().is_empty() {
            &self.reaction
        } else {
            &self.description
        }
    }

    /// Fingerprint of the `(reaction, description)` pair an embedding
    /// belongs to.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        embedding_fingerprint(&self.reaction, &self.description)
    }

    /// Check the primary key and embedding shape.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a blank reaction or an embedding with
    /// NaN or infinite components, and `DimensionMismatch` for an embedding
    /// of the wrong length.
    pub fn validate(&self, dimension: usize) -> Result<()> {
        if self.reaction.trim().is_empty() {
            return Err(Error::InvalidArgument("reaction must not be empty".into()));
        }
        if let Some(embedding) = &self.embedding {
            if embedding.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
            check_finite(embedding)?;
        }
        Ok(())
    }

    /// Whether the embedding, if any, has only finite components.
    #[must_use]
    pub fn has_finite_embedding(&self) -> bool {
        self.embedding.as_deref().is_none_or(is_finite)
    }
}

/// True if no component is NaN or infinite.
#[must_use]
pub fn is_finite(vector: &[f32]) -> bool {
    vector.iter().all(|c| c.is_finite())
}

/// Reject vectors with NaN or infinite components.
///
/// # Errors
///
/// Returns `InvalidArgument` naming the first bad position.
pub fn check_finite(vector: &[f32]) -> Result<()> {
    match vector.iter().position(|c| !c.is_finite()) {
        Some(position) => Err(Error::InvalidArgument(format!(
            "embedding component {position} is not finite"
        ))),
        None => Ok(()),
    }
}

/// SHA-256 over the reaction and description, length-prefixed so that
/// field boundaries cannot collide.
#[must_use]
pub fn embedding_fingerprint(reaction: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    for field in [reaction, description] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
