//! SQLite storage layer for FeynKB.
//!
//! # Submodules
//!
//! - [`codec`] - Embedding blob encoding
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Record store implementation

pub mod codec;
pub mod schema;
pub mod sqlite;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use codec::{decode_embedding, encode_embedding};
pub use sqlite::{EmbeddingStats, RecordStore, StoredEmbedding};

/// The record store shared between the knowledge base and its search tiers.
pub type SharedStore = Arc<Mutex<RecordStore>>;

/// Wrap a store for sharing.
#[must_use]
pub fn shared(store: RecordStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Lock a shared store, recovering from a poisoned lock.
pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, RecordStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}
