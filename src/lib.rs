//! Feynman diagram knowledge base.
//!
//! This crate provides the core functionality for the `fkb` CLI tool:
//! a store of diagram records, an approximate nearest-neighbor index over
//! their embeddings and a retriever that falls back across search tiers.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Diagram record type and validation
//! - [`storage`] - SQLite record store
//! - [`embeddings`] - Embedding providers (Gemini, Ollama, Model2Vec)
//! - [`index`] - Random-projection forest and its on-disk pair
//! - [`retrieval`] - Remote, vector and keyword search tiers
//! - [`sync`] - JSON import, delta log and autosave
//! - [`kb`] - The knowledge base tying the layers together
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod kb;
pub mod model;
pub mod retrieval;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
pub use kb::KnowledgeBase;
