//! Chunk store abstraction
//!
//! [`ChunkStore`] is the only persistence seam the ingestion and search
//! pipelines see. [`Repository`](super::Repository) implements it on
//! PostgreSQL + pgvector, [`InMemoryChunkStore`](super::InMemoryChunkStore)
//! keeps everything in process for tests and local runs.
//!
//! Every read is scoped by owner. A store never returns a document or chunk
//! whose `user_id` differs from the requested owner.

use crate::db::models::DocumentStatus;
use crate::errors::Result;
use crate::vector::Embedding;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document submitted for ingestion
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub user_id: String,
    pub filename: String,
    pub file_type: String,
    pub file_url: Option<String>,
    pub metadata: serde_json::Value,
}

/// Document row plus its current chunk count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub filename: String,
    pub file_type: String,
    pub status: DocumentStatus,
    pub chunk_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chunk ready to persist
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: i32,
    pub embedding: Embedding,
    pub metadata: serde_json::Value,
}

/// A persisted chunk including its vector
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: i32,
    pub embedding: Embedding,
    pub metadata: serde_json::Value,
}

/// Nearest-neighbour query
#[derive(Debug, Clone)]
pub struct RankQuery {
    pub vector: Embedding,
    pub owner_id: String,
    /// Restrict to these documents. An empty list matches nothing.
    pub document_ids: Option<Vec<String>>,
    pub top_k: usize,
    /// Inclusive lower bound on cosine similarity
    pub min_similarity: f32,
}

/// One ranked match
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: i32,
    pub similarity: f32,
    pub chunk_metadata: serde_json::Value,
    pub document_metadata: serde_json::Value,
    pub filename: String,
}

/// Per-owner document and chunk counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerStats {
    pub total_documents: u64,
    pub completed_documents: u64,
    pub total_chunks: u64,
    /// Mean chunk count over completed documents, 0 when there are none
    pub avg_chunks_per_document: f64,
}

impl OwnerStats {
    pub(crate) fn average(completed_documents: u64, completed_chunks: u64) -> f64 {
        if completed_documents == 0 {
            0.0
        } else {
            completed_chunks as f64 / completed_documents as f64
        }
    }
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    // ========================================================================
    // Documents
    // ========================================================================

    /// Insert a document in `processing` state, or restart ingestion for an
    /// existing document of the same owner.
    ///
    /// Fails with [`AppError::Conflict`](crate::AppError::Conflict) when the
    /// id belongs to another owner.
    async fn register_document(&self, document: NewDocument) -> Result<()>;

    /// Move a `processing` document to `status`
    ///
    /// Returns false when the document is missing or already terminal, in
    /// which case nothing changes.
    async fn set_document_status(&self, document_id: &str, status: DocumentStatus) -> Result<bool>;

    async fn find_document(&self, document_id: &str, owner_id: &str) -> Result<Option<DocumentSummary>>;

    /// Owner's documents, newest first
    async fn list_documents(
        &self,
        owner_id: &str,
        status: Option<DocumentStatus>,
    ) -> Result<Vec<DocumentSummary>>;

    /// Delete a document and, by cascade, its chunks. False when not owned.
    async fn delete_document(&self, document_id: &str, owner_id: &str) -> Result<bool>;

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Insert or overwrite chunks keyed by `(document_id, chunk_index)`
    ///
    /// All chunks are written in one transaction. Every embedding must have
    /// the store's configured dimension.
    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<()>;

    /// Remove chunks at index `keep` and above, left over from an earlier,
    /// longer ingestion of the same document. Returns the number removed.
    async fn prune_chunks(&self, document_id: &str, keep: usize) -> Result<u64>;

    async fn count_chunks(&self, document_id: &str) -> Result<u64>;

    async fn find_chunk(&self, chunk_id: &str, owner_id: &str) -> Result<Option<StoredChunk>>;

    /// Chunks of the owner's completed documents with similarity at or above
    /// the threshold, best first, ties broken by ascending chunk id
    async fn rank(&self, query: &RankQuery) -> Result<Vec<RankedChunk>>;

    // ========================================================================
    // Stats & Health
    // ========================================================================

    async fn owner_stats(&self, owner_id: &str) -> Result<OwnerStats>;

    async fn ping(&self) -> Result<()>;
}
