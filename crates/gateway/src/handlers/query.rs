//! Search handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use super::{validate_request, OwnerQuery};
use crate::AppState;
use docrag_common::errors::Result;
use docrag_search::{BatchQueryResult, RelevantChunk, SearchRequest, SearchStats, SimilarChunks};

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub query: String,
    pub relevant_chunks: Vec<RelevantChunk>,
    pub total_chunks_found: usize,
    /// Seconds
    pub search_time: f64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TopKQuery {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "user_id is required"))]
    pub user_id: String,

    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BatchSearchResponse {
    pub batch_results: Vec<BatchQueryResult>,
    pub total_queries: usize,
}

/// Semantic search over the owner's completed documents
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let started = Instant::now();
    let relevant_chunks = state.search.search(&request).await?;

    tracing::info!(
        user_id = %request.user_id,
        results = relevant_chunks.len(),
        "Search completed"
    );

    Ok(Json(SearchResponse {
        success: true,
        query: request.query.trim().to_string(),
        total_chunks_found: relevant_chunks.len(),
        relevant_chunks,
        search_time: started.elapsed().as_secs_f64(),
    }))
}

/// Chunks similar to a stored chunk
pub async fn find_similar(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
    Query(query): Query<TopKQuery>,
) -> Result<Json<SimilarChunks>> {
    validate_request(&query)?;
    let similar = state
        .search
        .find_similar(&chunk_id, &query.user_id, query.top_k)
        .await?;
    Ok(Json(similar))
}

/// Run up to the configured number of queries in one call
pub async fn batch_search(
    State(state): State<AppState>,
    Query(query): Query<TopKQuery>,
    Json(queries): Json<Vec<String>>,
) -> Result<Json<BatchSearchResponse>> {
    validate_request(&query)?;
    let batch_results = state
        .search
        .batch_search(&queries, &query.user_id, query.top_k)
        .await?;

    Ok(Json(BatchSearchResponse {
        total_queries: batch_results.len(),
        batch_results,
    }))
}

pub async fn stats(
    State(state): State<AppState>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<SearchStats>> {
    validate_request(&owner)?;
    Ok(Json(state.search.stats(&owner.user_id).await?))
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Ingest one text document for `user_id` and wait until it completes
    async fn ingest(app: &axum::Router, document_id: &str, user_id: &str) {
        let text = (1..=6)
            .map(|i| format!("Topic {} {}.", i, "photosynthesis ".repeat(20).trim()))
            .collect::<Vec<_>>()
            .join(" ");
        let (status, _) = send(
            app.clone(),
            post_json(
                "/documents/process-text",
                json!({
                    "text": text,
                    "document_id": document_id,
                    "user_id": user_id,
                    "title": format!("{document_id}.txt"),
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/documents/status/{document_id}?user_id={user_id}");
        for _ in 0..100 {
            let (_, body) = send(app.clone(), get(&uri)).await;
            if body["status"] == "completed" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("document {document_id} did not complete");
    }

    fn search_all(user_id: &str) -> Value {
        json!({
            "query": "  photosynthesis  ",
            "user_id": user_id,
            "top_k": 20,
            "similarity_threshold": -1.0
        })
    }

    #[tokio::test]
    async fn test_search_returns_owner_chunks() {
        let app = make_app(make_state());
        ingest(&app, "doc-a", "alice").await;
        ingest(&app, "doc-b", "bob").await;

        let (status, body) = send(app, post_json("/query/search", search_all("alice"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["query"], "photosynthesis");

        let chunks = body["relevant_chunks"].as_array().unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(body["total_chunks_found"], chunks.len());
        assert!(chunks.iter().all(|c| c["document_id"] == "doc-a"));
        assert!(chunks.iter().all(|c| c["filename"] == "doc-a.txt"));

        let scores: Vec<f64> = chunks
            .iter()
            .map(|c| c["similarity_score"].as_f64().unwrap())
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_search_document_filter() {
        let app = make_app(make_state());
        ingest(&app, "doc-a", "alice").await;
        ingest(&app, "doc-b", "alice").await;

        let mut request = search_all("alice");
        request["document_ids"] = json!(["doc-b"]);
        let (status, body) = send(app, post_json("/query/search", request)).await;
        assert_eq!(status, StatusCode::OK);
        let chunks = body["relevant_chunks"].as_array().unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c["document_id"] == "doc-b"));
    }

    #[tokio::test]
    async fn test_search_validation() {
        let app = make_app(make_state());

        let (status, body) = send(
            app.clone(),
            post_json("/query/search", json!({ "query": "   ", "user_id": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            app.clone(),
            post_json("/query/search", json!({ "query": "x", "user_id": "alice", "top_k": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app,
            post_json(
                "/query/search",
                json!({ "query": "x", "user_id": "alice", "similarity_threshold": 1.5 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_find_similar_excludes_source() {
        let app = make_app(make_state());
        ingest(&app, "doc-a", "alice").await;

        let (_, body) = send(app.clone(), post_json("/query/search", search_all("alice"))).await;
        let chunk_id = body["relevant_chunks"][0]["chunk_id"].as_str().unwrap().to_string();

        let (status, body) = send(
            app.clone(),
            get(&format!("/query/similar/{chunk_id}?user_id=alice&top_k=5")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["original_chunk_id"], chunk_id.as_str());
        let similar = body["similar_chunks"].as_array().unwrap();
        assert_eq!(body["total_found"], similar.len());
        assert!(similar.iter().all(|c| c["chunk_id"] != chunk_id.as_str()));

        let (status, _) = send(
            app.clone(),
            get(&format!("/query/similar/{chunk_id}?user_id=bob")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app, get("/query/similar/missing?user_id=alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_batch_search() {
        let app = make_app(make_state());
        ingest(&app, "doc-a", "alice").await;

        let (status, body) = send(
            app.clone(),
            post_json(
                "/query/batch-search?user_id=alice",
                json!(["photosynthesis", "  ", "chlorophyll"]),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_queries"], 2);
        assert_eq!(body["batch_results"][0]["query"], "photosynthesis");
        assert_eq!(body["batch_results"][1]["query"], "chlorophyll");

        let too_many: Vec<String> = (0..11).map(|i| format!("query {i}")).collect();
        let (status, _) = send(
            app,
            post_json("/query/batch-search?user_id=alice", json!(too_many)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats() {
        let app = make_app(make_state());
        ingest(&app, "doc-a", "alice").await;

        let (status, body) = send(app.clone(), get("/query/stats?user_id=alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], "alice");
        assert_eq!(body["total_documents"], 1);
        assert_eq!(body["completed_documents"], 1);
        assert_eq!(body["embedding_model"], "mock-embedding");
        let total = body["total_chunks"].as_u64().unwrap();
        assert!(total > 0);
        assert_eq!(body["avg_chunks_per_document"].as_f64().unwrap(), total as f64);

        let (status, _) = send(app, get("/query/stats")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
