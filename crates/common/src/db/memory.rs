//! In-process [`ChunkStore`]
//!
//! Documents and chunks live in `HashMap`s behind a single
//! `tokio::sync::RwLock`, so every call sees either all or none of another
//! call's writes. Ranking scans all chunks with [`cosine_similarity`].

use crate::db::models::DocumentStatus;
use crate::db::store::{
    ChunkRecord, ChunkStore, DocumentSummary, NewDocument, OwnerStats, RankQuery, RankedChunk,
    StoredChunk,
};
use crate::errors::{AppError, Result};
use crate::vector::cosine_similarity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct DocumentEntry {
    user_id: String,
    filename: String,
    file_type: String,
    status: DocumentStatus,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    documents: HashMap<String, DocumentEntry>,
    /// Keyed by `(document_id, chunk_index)`
    chunks: HashMap<(String, i32), StoredChunk>,
}

impl State {
    fn chunk_count(&self, document_id: &str) -> u64 {
        self.chunks.keys().filter(|(doc, _)| doc == document_id).count() as u64
    }

    fn summary(&self, id: &str, entry: &DocumentEntry) -> DocumentSummary {
        DocumentSummary {
            document_id: id.to_string(),
            filename: entry.filename.clone(),
            file_type: entry.file_type.clone(),
            status: entry.status,
            chunk_count: self.chunk_count(id),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug)]
pub struct InMemoryChunkStore {
    state: RwLock<State>,
    dimension: usize,
}

impl InMemoryChunkStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            dimension,
        }
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn register_document(&self, document: NewDocument) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        if let Some(existing) = state.documents.get_mut(&document.id) {
            if existing.user_id != document.user_id {
                return Err(AppError::Conflict {
                    message: format!("Document {} belongs to another user", document.id),
                });
            }
            existing.filename = document.filename;
            existing.file_type = document.file_type;
            existing.metadata = document.metadata;
            existing.status = DocumentStatus::Processing;
            existing.updated_at = now;
            return Ok(());
        }

        state.documents.insert(
            document.id,
            DocumentEntry {
                user_id: document.user_id,
                filename: document.filename,
                file_type: document.file_type,
                status: DocumentStatus::Processing,
                metadata: document.metadata,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn set_document_status(&self, document_id: &str, status: DocumentStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.documents.get_mut(document_id) {
            Some(entry) if entry.status == DocumentStatus::Processing => {
                entry.status = status;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_document(&self, document_id: &str, owner_id: &str) -> Result<Option<DocumentSummary>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .get(document_id)
            .filter(|entry| entry.user_id == owner_id)
            .map(|entry| state.summary(document_id, entry)))
    }

    async fn list_documents(
        &self,
        owner_id: &str,
        status: Option<DocumentStatus>,
    ) -> Result<Vec<DocumentSummary>> {
        let state = self.state.read().await;
        let mut documents: Vec<DocumentSummary> = state
            .documents
            .iter()
            .filter(|(_, entry)| entry.user_id == owner_id)
            .filter(|(_, entry)| status.map_or(true, |s| entry.status == s))
            .map(|(id, entry)| state.summary(id, entry))
            .collect();

        documents.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        Ok(documents)
    }

    async fn delete_document(&self, document_id: &str, owner_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let owned = state
            .documents
            .get(document_id)
            .is_some_and(|entry| entry.user_id == owner_id);
        if !owned {
            return Ok(false);
        }

        state.documents.remove(document_id);
        state.chunks.retain(|(doc, _), _| doc != document_id);
        Ok(true)
    }

    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        // Validate everything before the first write so a bad batch leaves no trace.
        for chunk in chunks {
            chunk.embedding.ensure_dimension(self.dimension)?;
        }

        let mut state = self.state.write().await;
        for chunk in chunks {
            if !state.documents.contains_key(&chunk.document_id) {
                return Err(AppError::DocumentNotFound {
                    id: chunk.document_id.clone(),
                });
            }
        }

        for chunk in chunks {
            state.chunks.insert(
                (chunk.document_id.clone(), chunk.chunk_index),
                StoredChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    document_id: chunk.document_id.clone(),
                    content: chunk.content.clone(),
                    chunk_index: chunk.chunk_index,
                    embedding: chunk.embedding.clone(),
                    metadata: chunk.metadata.clone(),
                },
            );
        }
        Ok(())
    }

    async fn prune_chunks(&self, document_id: &str, keep: usize) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.chunks.len();
        state
            .chunks
            .retain(|(doc, index), _| doc != document_id || (*index as i64) < keep as i64);
        Ok((before - state.chunks.len()) as u64)
    }

    async fn count_chunks(&self, document_id: &str) -> Result<u64> {
        Ok(self.state.read().await.chunk_count(document_id))
    }

    async fn find_chunk(&self, chunk_id: &str, owner_id: &str) -> Result<Option<StoredChunk>> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .values()
            .find(|chunk| chunk.chunk_id == chunk_id)
            .filter(|chunk| {
                state
                    .documents
                    .get(&chunk.document_id)
                    .is_some_and(|doc| doc.user_id == owner_id)
            })
            .cloned())
    }

    async fn rank(&self, query: &RankQuery) -> Result<Vec<RankedChunk>> {
        query.vector.ensure_dimension(self.dimension)?;

        let state = self.state.read().await;
        let mut ranked: Vec<RankedChunk> = state
            .chunks
            .values()
            .filter_map(|chunk| {
                let document = state.documents.get(&chunk.document_id)?;
                if document.user_id != query.owner_id || document.status != DocumentStatus::Completed {
                    return None;
                }
                if let Some(ids) = &query.document_ids {
                    if !ids.contains(&chunk.document_id) {
                        return None;
                    }
                }

                let similarity =
                    cosine_similarity(query.vector.as_slice(), chunk.embedding.as_slice());
                if similarity < query.min_similarity {
                    return None;
                }

                Some(RankedChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    document_id: chunk.document_id.clone(),
                    content: chunk.content.clone(),
                    chunk_index: chunk.chunk_index,
                    similarity,
                    chunk_metadata: chunk.metadata.clone(),
                    document_metadata: document.metadata.clone(),
                    filename: document.filename.clone(),
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        ranked.truncate(query.top_k);
        Ok(ranked)
    }

    async fn owner_stats(&self, owner_id: &str) -> Result<OwnerStats> {
        let state = self.state.read().await;
        let mut stats = OwnerStats::default();
        let mut completed_chunks = 0;

        for (id, entry) in state.documents.iter().filter(|(_, e)| e.user_id == owner_id) {
            let chunks = state.chunk_count(id);
            stats.total_documents += 1;
            stats.total_chunks += chunks;
            if entry.status == DocumentStatus::Completed {
                stats.completed_documents += 1;
                completed_chunks += chunks;
            }
        }

        stats.avg_chunks_per_document =
            OwnerStats::average(stats.completed_documents, completed_chunks);
        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Embedding;
    use serde_json::json;

    fn document(id: &str, user: &str) -> NewDocument {
        NewDocument {
            id: id.to_string(),
            user_id: user.to_string(),
            filename: format!("{}.pdf", id),
            file_type: "pdf".to_string(),
            file_url: None,
            metadata: json!({ "course": "bio-101" }),
        }
    }

    fn chunk(document_id: &str, index: i32, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            chunk_id: format!("{}-{}", document_id, index),
            document_id: document_id.to_string(),
            content: format!("chunk {} of {}", index, document_id),
            chunk_index: index,
            embedding: Embedding::new(vector),
            metadata: json!({ "char_count": 10 }),
        }
    }

    fn query(owner: &str, vector: Vec<f32>, min_similarity: f32) -> RankQuery {
        RankQuery {
            vector: Embedding::new(vector),
            owner_id: owner.to_string(),
            document_ids: None,
            top_k: 10,
            min_similarity,
        }
    }

    async fn seeded() -> InMemoryChunkStore {
        let store = InMemoryChunkStore::new(2);
        store.register_document(document("d1", "u1")).await.unwrap();
        store.register_document(document("d2", "u2")).await.unwrap();
        store
            .upsert_chunks(&[chunk("d1", 0, vec![1.0, 0.0]), chunk("d1", 1, vec![0.6, 0.8])])
            .await
            .unwrap();
        store.upsert_chunks(&[chunk("d2", 0, vec![1.0, 0.0])]).await.unwrap();
        store.set_document_status("d1", DocumentStatus::Completed).await.unwrap();
        store.set_document_status("d2", DocumentStatus::Completed).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_rank_orders_and_scopes_by_owner() {
        let store = seeded().await;
        let results = store.rank(&query("u1", vec![1.0, 0.0], 0.0)).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "d1-0");
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(results[1].chunk_id, "d1-1");
        assert!(results.iter().all(|r| r.document_id == "d1"));
        assert_eq!(results[0].document_metadata, json!({ "course": "bio-101" }));
    }

    #[tokio::test]
    async fn test_rank_ignores_cross_owner_document_filter() {
        let store = seeded().await;
        let mut q = query("u1", vec![1.0, 0.0], 0.0);
        q.document_ids = Some(vec!["d2".to_string()]);
        assert!(store.rank(&q).await.unwrap().is_empty());

        q.document_ids = Some(Vec::new());
        assert!(store.rank(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rank_threshold_is_inclusive_and_monotonic() {
        let store = seeded().await;
        let low = store.rank(&query("u1", vec![1.0, 0.0], 0.1)).await.unwrap();
        let mid = store.rank(&query("u1", vec![1.0, 0.0], 0.6)).await.unwrap();
        let high = store.rank(&query("u1", vec![1.0, 0.0], 0.9)).await.unwrap();
        assert!(low.len() >= mid.len() && mid.len() >= high.len());
        assert_eq!(high.len(), 1);
    }

    #[tokio::test]
    async fn test_rank_ties_break_by_chunk_id() {
        let store = InMemoryChunkStore::new(2);
        store.register_document(document("d1", "u1")).await.unwrap();
        let mut b = chunk("d1", 0, vec![1.0, 0.0]);
        b.chunk_id = "b".into();
        let mut a = chunk("d1", 1, vec![2.0, 0.0]);
        a.chunk_id = "a".into();
        store.upsert_chunks(&[b, a]).await.unwrap();
        store.set_document_status("d1", DocumentStatus::Completed).await.unwrap();

        let results = store.rank(&query("u1", vec![1.0, 0.0], 0.0)).await.unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_processing_documents_are_not_ranked() {
        let store = InMemoryChunkStore::new(2);
        store.register_document(document("d1", "u1")).await.unwrap();
        store.upsert_chunks(&[chunk("d1", 0, vec![1.0, 0.0])]).await.unwrap();
        assert!(store.rank(&query("u1", vec![1.0, 0.0], 0.0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_status_never_reverts() {
        let store = seeded().await;
        assert!(!store.set_document_status("d1", DocumentStatus::Failed).await.unwrap());
        let doc = store.find_document("d1", "u1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert!(!store.set_document_status("missing", DocumentStatus::Failed).await.unwrap());
    }

    #[tokio::test]
    async fn test_resubmission_restarts_and_foreign_owner_conflicts() {
        let store = seeded().await;
        store.register_document(document("d1", "u1")).await.unwrap();
        let doc = store.find_document("d1", "u1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);

        let err = store.register_document(document("d1", "u2")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_index_and_checks_dimension() {
        let store = seeded().await;
        let mut replacement = chunk("d1", 0, vec![0.0, 1.0]);
        replacement.content = "rewritten".into();
        store.upsert_chunks(&[replacement]).await.unwrap();
        assert_eq!(store.count_chunks("d1").await.unwrap(), 2);

        let err = store
            .upsert_chunks(&[chunk("d1", 2, vec![1.0, 0.0]), chunk("d1", 3, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { expected: 2, actual: 3 }));
        assert_eq!(store.count_chunks("d1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_prune_removes_trailing_chunks() {
        let store = seeded().await;
        assert_eq!(store.prune_chunks("d1", 1).await.unwrap(), 1);
        assert_eq!(store.count_chunks("d1").await.unwrap(), 1);
        assert_eq!(store.count_chunks("d2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_chunk_scoped_to_owner() {
        let store = seeded().await;
        assert!(store.find_chunk("d1-0", "u1").await.unwrap().is_some());
        assert!(store.find_chunk("d1-0", "u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_cascades_and_stats() {
        let store = seeded().await;
        store.register_document(document("d3", "u1")).await.unwrap();

        let stats = store.owner_stats("u1").await.unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.completed_documents, 1);
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.avg_chunks_per_document, 2.0);

        assert!(!store.delete_document("d1", "u2").await.unwrap());
        assert!(store.delete_document("d1", "u1").await.unwrap());
        assert_eq!(store.count_chunks("d1").await.unwrap(), 0);
        assert!(store.find_chunk("d1-0", "u1").await.unwrap().is_none());

        let listed = store.list_documents("u1", None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].document_id, "d3");
        let completed = store
            .list_documents("u1", Some(DocumentStatus::Completed))
            .await
            .unwrap();
        assert!(completed.is_empty());
    }
}
