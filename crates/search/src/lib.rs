//! DocRAG semantic search
//!
//! Turns a free-text query into a ranked list of chunks from the caller's
//! completed documents:
//! - Single query search with threshold and document filter
//! - Find-similar from a stored chunk's own vector
//! - Batch search over several queries

mod pipeline;

pub use pipeline::SearchPipeline;

use docrag_common::db::OwnerStats;
use serde::{Deserialize, Serialize};

/// Search request parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text, trimmed before embedding
    pub query: String,

    /// Owner whose documents are searched
    pub user_id: String,

    /// Restrict to these documents. `None` or an empty list searches all of
    /// the owner's documents.
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,

    /// Maximum results to return, defaults to the configured `default_top_k`
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Minimum cosine similarity, defaults to the configured threshold
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
}

/// A ranked search match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,

    /// Cosine similarity in [-1, 1]
    pub similarity_score: f32,

    /// Chunk metadata, plus `document_metadata` and `search_time` for
    /// query searches
    pub metadata: serde_json::Value,

    pub filename: Option<String>,
}

/// Find-similar result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarChunks {
    pub original_chunk_id: String,

    /// First 200 characters of the source chunk
    pub original_content: String,

    pub similar_chunks: Vec<RelevantChunk>,
    pub total_found: usize,
}

/// Results for one query of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchQueryResult {
    pub query: String,
    pub relevant_chunks: Vec<RelevantChunk>,
    pub chunks_found: usize,
}

/// Per-owner statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStats {
    pub user_id: String,

    #[serde(flatten)]
    pub counts: OwnerStats,

    /// Model used to embed queries and chunks
    pub embedding_model: String,
}
