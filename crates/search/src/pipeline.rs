//! Semantic search pipeline
//!
//! Validates the request, embeds the query once and asks the chunk store for
//! the nearest chunks. Input errors are raised before any embedding call.

use crate::{BatchQueryResult, RelevantChunk, SearchRequest, SearchStats, SimilarChunks};
use docrag_common::config::SearchConfig;
use docrag_common::db::{ChunkStore, RankQuery, RankedChunk};
use docrag_common::errors::{AppError, Result};
use docrag_common::metrics::record_search;
use docrag_common::{Embedder, Embedding};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Characters of the source chunk echoed back by find-similar
const PREVIEW_CHARS: usize = 200;

/// Search pipeline over an embedder and a chunk store
pub struct SearchPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn ChunkStore>,
    limits: SearchConfig,
}

impl SearchPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn ChunkStore>, limits: SearchConfig) -> Self {
        Self {
            embedder,
            store,
            limits,
        }
    }

    pub fn limits(&self) -> &SearchConfig {
        &self.limits
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Rank the owner's chunks against a free-text query
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<RelevantChunk>> {
        let started = Instant::now();

        let query = request.query.trim();
        if query.is_empty() {
            return Err(AppError::validation("query", "Query cannot be empty"));
        }
        require_user(&request.user_id)?;
        let top_k = self.check_top_k(request.top_k.unwrap_or(self.limits.default_top_k))?;
        let threshold = check_threshold(
            request
                .similarity_threshold
                .unwrap_or(self.limits.default_similarity_threshold),
        )?;
        let document_ids = request
            .document_ids
            .clone()
            .filter(|ids| !ids.is_empty());

        let vector = Embedding::new(self.embedder.embed(query).await?);
        let ranked = self
            .store
            .rank(&RankQuery {
                vector,
                owner_id: request.user_id.clone(),
                document_ids,
                top_k,
                min_similarity: threshold,
            })
            .await?;

        let search_time = started.elapsed().as_secs_f64();
        let results: Vec<RelevantChunk> = ranked
            .into_iter()
            .map(|chunk| {
                let metadata = merge_metadata(
                    &chunk.chunk_metadata,
                    json!({
                        "document_metadata": object_or_empty(&chunk.document_metadata),
                        "search_time": search_time,
                    }),
                );
                relevant(chunk, metadata)
            })
            .collect();

        record_search(search_time, "query", results.len());
        info!(
            results = results.len(),
            top_k,
            threshold,
            duration_ms = (search_time * 1000.0) as u64,
            "Search completed"
        );

        Ok(results)
    }

    /// Chunks most similar to a stored chunk, excluding the chunk itself
    #[instrument(skip(self))]
    pub async fn find_similar(
        &self,
        chunk_id: &str,
        user_id: &str,
        top_k: Option<usize>,
    ) -> Result<SimilarChunks> {
        let started = Instant::now();
        require_user(user_id)?;
        let top_k = self.check_top_k(top_k.unwrap_or(self.limits.default_top_k))?;

        let source = self
            .store
            .find_chunk(chunk_id, user_id)
            .await?
            .ok_or_else(|| AppError::ChunkNotFound {
                id: chunk_id.to_string(),
            })?;

        let ranked = self
            .store
            .rank(&RankQuery {
                vector: source.embedding,
                owner_id: user_id.to_string(),
                document_ids: None,
                top_k: top_k + 1,
                min_similarity: self.limits.similar_chunk_threshold,
            })
            .await?;

        let similar_chunks: Vec<RelevantChunk> = ranked
            .into_iter()
            .filter(|chunk| chunk.chunk_id != chunk_id)
            .take(top_k)
            .map(|chunk| {
                let metadata = object_or_empty(&chunk.chunk_metadata);
                relevant(chunk, metadata)
            })
            .collect();

        record_search(started.elapsed().as_secs_f64(), "similar", similar_chunks.len());
        debug!(found = similar_chunks.len(), "Similar chunks found");

        Ok(SimilarChunks {
            original_chunk_id: chunk_id.to_string(),
            original_content: preview(&source.content),
            total_found: similar_chunks.len(),
            similar_chunks,
        })
    }

    /// Run several queries in order
    ///
    /// Blank queries are skipped. The first failing query fails the batch.
    #[instrument(skip(self, queries), fields(queries = queries.len()))]
    pub async fn batch_search(
        &self,
        queries: &[String],
        user_id: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<BatchQueryResult>> {
        if queries.len() > self.limits.max_batch_queries {
            return Err(AppError::validation(
                "queries",
                format!(
                    "Maximum {} queries allowed in batch",
                    self.limits.max_batch_queries
                ),
            ));
        }
        let top_k = top_k.unwrap_or(self.limits.batch_top_k);

        let mut results = Vec::with_capacity(queries.len());
        for query in queries.iter().filter(|q| !q.trim().is_empty()) {
            let relevant_chunks = self
                .search(&SearchRequest {
                    query: query.clone(),
                    user_id: user_id.to_string(),
                    document_ids: None,
                    top_k: Some(top_k),
                    similarity_threshold: Some(self.limits.default_similarity_threshold),
                })
                .await?;

            results.push(BatchQueryResult {
                query: query.clone(),
                chunks_found: relevant_chunks.len(),
                relevant_chunks,
            });
        }

        Ok(results)
    }

    /// Document and chunk counts for an owner
    pub async fn stats(&self, user_id: &str) -> Result<SearchStats> {
        require_user(user_id)?;
        let counts = self.store.owner_stats(user_id).await?;
        Ok(SearchStats {
            user_id: user_id.to_string(),
            counts,
            embedding_model: self.embedder.model_name().to_string(),
        })
    }

    fn check_top_k(&self, top_k: usize) -> Result<usize> {
        if top_k == 0 {
            return Err(AppError::validation("top_k", "top_k must be positive"));
        }
        if top_k > self.limits.max_top_k {
            return Err(AppError::validation(
                "top_k",
                format!("top_k cannot exceed {}", self.limits.max_top_k),
            ));
        }
        Ok(top_k)
    }
}

fn require_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(AppError::validation("user_id", "user_id is required"));
    }
    Ok(())
}

fn check_threshold(threshold: f32) -> Result<f32> {
    if !(-1.0..=1.0).contains(&threshold) {
        return Err(AppError::validation(
            "similarity_threshold",
            "similarity_threshold must be between -1 and 1",
        ));
    }
    Ok(threshold)
}

fn relevant(chunk: RankedChunk, metadata: Value) -> RelevantChunk {
    RelevantChunk {
        chunk_id: chunk.chunk_id,
        document_id: chunk.document_id,
        content: chunk.content,
        similarity_score: chunk.similarity,
        metadata,
        filename: Some(chunk.filename),
    }
}

fn object_or_empty(value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        _ => Value::Object(Map::new()),
    }
}

/// Chunk metadata with `extra`'s keys layered on top
fn merge_metadata(chunk_metadata: &Value, extra: Value) -> Value {
    let mut merged = match chunk_metadata {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(extra) = extra {
        merged.extend(extra);
    }
    Value::Object(merged)
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docrag_common::db::models::DocumentStatus;
    use docrag_common::db::{ChunkRecord, InMemoryChunkStore, NewDocument};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    /// Maps known query strings to fixed vectors
    struct TableEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, [f32; 2])]) -> Self {
            Self {
                vectors: entries
                    .iter()
                    .map(|(text, v)| (text.to_string(), v.to_vec()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| AppError::EmbeddingError {
                    message: format!("no vector for {:?}", text),
                })
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn model_name(&self) -> &str {
            "table"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn record(document_id: &str, index: i32, content: &str, vector: [f32; 2]) -> ChunkRecord {
        ChunkRecord {
            chunk_id: format!("{}-{}", document_id, index),
            document_id: document_id.to_string(),
            content: content.to_string(),
            chunk_index: index,
            embedding: Embedding::new(vector.to_vec()),
            metadata: json!({ "char_count": content.chars().count(), "word_count": 3 }),
        }
    }

    async fn add_document(store: &InMemoryChunkStore, id: &str, user: &str, chunks: Vec<ChunkRecord>) {
        store
            .register_document(NewDocument {
                id: id.to_string(),
                user_id: user.to_string(),
                filename: format!("{}.pdf", id),
                file_type: "pdf".to_string(),
                file_url: None,
                metadata: json!({ "course": "bio-101" }),
            })
            .await
            .unwrap();
        store.upsert_chunks(&chunks).await.unwrap();
        store
            .set_document_status(id, DocumentStatus::Completed)
            .await
            .unwrap();
    }

    /// alice owns doc-a (similarities 1.0, 0.6, 0.0 to "north") and doc-b
    /// (-1.0); bob owns doc-x (1.0)
    async fn fixture() -> (SearchPipeline, Arc<TableEmbedder>) {
        let store = Arc::new(InMemoryChunkStore::new(2));
        add_document(
            &store,
            "doc-a",
            "alice",
            vec![
                record("doc-a", 0, "due north", [1.0, 0.0]),
                record("doc-a", 1, "north east", [0.6, 0.8]),
                record("doc-a", 2, "due east", [0.0, 1.0]),
            ],
        )
        .await;
        add_document(&store, "doc-b", "alice", vec![record("doc-b", 0, "due south", [-1.0, 0.0])]).await;
        add_document(&store, "doc-x", "bob", vec![record("doc-x", 0, "bob north", [1.0, 0.0])]).await;

        let embedder = Arc::new(TableEmbedder::new(&[
            ("north", [1.0, 0.0]),
            ("east", [0.0, 1.0]),
        ]));
        let pipeline = SearchPipeline::new(embedder.clone(), store, SearchConfig::default());
        (pipeline, embedder)
    }

    fn request(query: &str, user: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            user_id: user.to_string(),
            ..SearchRequest::default()
        }
    }

    fn ids(results: &[RelevantChunk]) -> Vec<&str> {
        results.iter().map(|r| r.chunk_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_search_ranks_and_merges_metadata() {
        let (pipeline, _) = fixture().await;
        let results = pipeline.search(&request("  north  ", "alice")).await.unwrap();

        assert_eq!(ids(&results), vec!["doc-a-0", "doc-a-1"]);
        assert!((results[0].similarity_score - 1.0).abs() < 1e-5);
        assert!((results[1].similarity_score - 0.6).abs() < 1e-5);

        let metadata = &results[0].metadata;
        assert_eq!(metadata["char_count"], json!(9));
        assert_eq!(metadata["document_metadata"], json!({ "course": "bio-101" }));
        assert!(metadata["search_time"].as_f64().unwrap() >= 0.0);
        assert_eq!(results[0].filename.as_deref(), Some("doc-a.pdf"));
    }

    #[tokio::test]
    async fn test_threshold_above_best_match_is_empty_success() {
        let store = Arc::new(InMemoryChunkStore::new(2));
        add_document(&store, "doc-a", "alice", vec![record("doc-a", 0, "half way", [0.5, 0.866_025_4])]).await;
        let embedder = Arc::new(TableEmbedder::new(&[("north", [1.0, 0.0])]));
        let pipeline = SearchPipeline::new(embedder, store, SearchConfig::default());

        let mut req = request("north", "alice");
        req.similarity_threshold = Some(0.9);
        assert!(pipeline.search(&req).await.unwrap().is_empty());

        req.similarity_threshold = Some(0.4);
        assert_eq!(pipeline.search(&req).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_raising_threshold_never_adds_results() {
        let (pipeline, _) = fixture().await;
        let mut previous = usize::MAX;
        for threshold in [-1.0, -0.5, 0.0, 0.3, 0.6, 0.9, 1.0] {
            let mut req = request("north", "alice");
            req.similarity_threshold = Some(threshold);
            req.top_k = Some(20);
            let count = pipeline.search(&req).await.unwrap().len();
            assert!(count <= previous);
            previous = count;
        }
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_embedding() {
        let (pipeline, embedder) = fixture().await;

        let mut cases = vec![request("   ", "alice"), request("north", "")];
        let mut zero = request("north", "alice");
        zero.top_k = Some(0);
        cases.push(zero);
        let mut too_many = request("north", "alice");
        too_many.top_k = Some(21);
        cases.push(too_many);
        let mut out_of_range = request("north", "alice");
        out_of_range.similarity_threshold = Some(1.5);
        cases.push(out_of_range);
        let mut nan = request("north", "alice");
        nan.similarity_threshold = Some(f32::NAN);
        cases.push(nan);

        for case in cases {
            let err = pipeline.search(&case).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }), "{case:?} gave {err}");
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_document_filter() {
        let (pipeline, _) = fixture().await;

        let mut req = request("north", "alice");
        req.similarity_threshold = Some(-1.0);
        req.document_ids = Some(vec!["doc-b".to_string()]);
        assert_eq!(ids(&pipeline.search(&req).await.unwrap()), vec!["doc-b-0"]);

        req.document_ids = Some(vec![]);
        assert_eq!(pipeline.search(&req).await.unwrap().len(), 4);

        req.document_ids = Some(vec!["doc-x".to_string()]);
        assert!(pipeline.search(&req).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_owner_isolation() {
        let (pipeline, _) = fixture().await;
        let results = pipeline.search(&request("north", "bob")).await.unwrap();
        assert_eq!(ids(&results), vec!["doc-x-0"]);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_an_error() {
        let (pipeline, _) = fixture().await;
        let err = pipeline.search(&request("unknown", "alice")).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingError { .. }));
    }

    #[tokio::test]
    async fn test_find_similar_excludes_source() {
        let (pipeline, embedder) = fixture().await;
        let similar = pipeline.find_similar("doc-a-1", "alice", Some(5)).await.unwrap();

        assert_eq!(similar.original_chunk_id, "doc-a-1");
        assert_eq!(similar.original_content, "north east");
        // cos([0.6,0.8],[1,0]) = 0.6, cos([0.6,0.8],[0,1]) = 0.8, south is below 0.1
        assert_eq!(ids(&similar.similar_chunks), vec!["doc-a-2", "doc-a-0"]);
        assert_eq!(similar.total_found, 2);
        assert!(similar.similar_chunks[0].metadata.get("search_time").is_none());
        assert_eq!(similar.similar_chunks[0].metadata["word_count"], json!(3));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);

        let top_one = pipeline.find_similar("doc-a-1", "alice", Some(1)).await.unwrap();
        assert_eq!(ids(&top_one.similar_chunks), vec!["doc-a-2"]);
    }

    #[tokio::test]
    async fn test_find_similar_scoped_to_owner() {
        let (pipeline, _) = fixture().await;
        assert_err!(pipeline.find_similar("missing", "alice", None).await);
        let err = pipeline.find_similar("doc-x-0", "alice", None).await.unwrap_err();
        assert!(matches!(err, AppError::ChunkNotFound { .. }));
    }

    #[tokio::test]
    async fn test_batch_search() {
        let (pipeline, _) = fixture().await;
        let queries = vec!["north".to_string(), "  ".to_string(), "east".to_string()];
        let results = assert_ok!(pipeline.batch_search(&queries, "alice", None).await);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].query, "north");
        assert_eq!(results[0].chunks_found, 2);
        assert_eq!(results[1].query, "east");
        assert_eq!(ids(&results[1].relevant_chunks), vec!["doc-a-2", "doc-a-1"]);
    }

    #[tokio::test]
    async fn test_batch_search_limits_and_aborts() {
        let (pipeline, _) = fixture().await;

        let too_many: Vec<String> = (0..11).map(|_| "north".to_string()).collect();
        let err = pipeline.batch_search(&too_many, "alice", None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let failing = vec!["north".to_string(), "unknown".to_string(), "east".to_string()];
        let err = pipeline.batch_search(&failing, "alice", Some(3)).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingError { .. }));
    }

    #[tokio::test]
    async fn test_stats() {
        let (pipeline, _) = fixture().await;
        let stats = pipeline.stats("alice").await.unwrap();
        assert_eq!(stats.counts.total_documents, 2);
        assert_eq!(stats.counts.total_chunks, 4);
        assert!((stats.counts.avg_chunks_per_document - 2.0).abs() < f64::EPSILON);
        assert_eq!(stats.embedding_model, "table");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(250);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), 203);
        assert!(cut.ends_with("..."));
        assert_eq!(preview(&"a".repeat(200)), "a".repeat(200));
    }
}
