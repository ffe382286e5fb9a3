//! Embedding generation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ Retriever / Backfill │
//! └──────────┬───────────┘
//!            │ embed(text, task)
//!            ▼
//! ┌──────────────────────┐
//! │       Embedder       │  ← timeout + dimension check per provider
//! └──────────┬───────────┘
//!       ┌────┴─────┐
//!       ▼          ▼
//!  ┌────────┐ ┌──────────────────┐
//!  │ Gemini │ │ Ollama/Model2Vec │
//!  └────────┘ └──────────────────┘
//!    remote         local
//! ```
//!
//! The chain returns `None` (never panics) when every provider fails;
//! callers degrade to keyword search.
//!
//! # Configuration
//!
//! Environment variables take precedence over `~/.feynkb/config.json`:
//! - `GOOGLE_API_KEY` - enables the Gemini provider
//! - `GEMINI_EMBEDDING_MODEL_NAME` - Gemini model (default: `text-embedding-004`)
//! - `FKB_LOCAL_EMBEDDER` - `ollama` (default), `model2vec` or `none`
//! - `OLLAMA_ENDPOINT` / `OLLAMA_MODEL` - local server and model
//! - `MODEL2VEC_MODEL` - static model name
//! - `FKB_EMBEDDINGS_ENABLED` - set to `false` to disable embeddings

pub mod cache;
pub mod chain;
pub mod config;
pub mod factory;
pub mod gemini;
pub mod model2vec;
pub mod ollama;
pub mod provider;
pub mod types;

pub use cache::EmbeddingCache;
pub use chain::{Embedded, Embedder};
pub use config::EmbedderConfig;
pub use factory::{ProviderDetection, create_embedder, detect_available_providers};
pub use gemini::GeminiProvider;
pub use model2vec::Model2VecProvider;
pub use ollama::OllamaProvider;
pub use provider::{BoxedProvider, EmbeddingProvider};
pub use types::{
    EmbeddingSettings, LocalProviderType, ModelConfig, ProviderInfo, TaskType, model2vec_models,
};
