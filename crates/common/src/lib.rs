//! DocRAG Common Library
//!
//! Shared code for the DocRAG services:
//! - Configuration management
//! - Error types and handling
//! - Embedding client abstraction
//! - Embedding vector type and cosine similarity
//! - Chunk store seam, PostgreSQL repository and in-memory store
//! - Metrics

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod vector;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{ChunkStore, Repository};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use vector::{cosine_similarity, Embedding};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
