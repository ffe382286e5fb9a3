//! Approximate nearest-neighbour index over record embeddings.
//!
//! - [`forest`]: the immutable angular random-projection forest and its
//!   binary blob format
//! - [`vector_index`]: the forest paired with an id map, with load
//!   reconciliation and rebuild-and-swap updates
//! - [`builder`]: full rebuild from the record store

pub mod builder;
pub mod forest;
pub mod vector_index;

pub use builder::{BuildReport, build_from_store};
pub use forest::{AngularForest, ForestParams};
pub use vector_index::{IndexStatus, LoadOutcome, Neighbor, Rebuilt, VectorIndex, rebuild};
