//! Document management handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use validator::Validate;

use super::{validate_request, OwnerQuery};
use crate::AppState;
use docrag_common::{
    db::{models::DocumentStatus, DocumentSummary, NewDocument},
    errors::{AppError, Result},
};
use docrag_ingestion::{DocumentJob, FileType, IngestionSource};

/// Request to ingest a file from a URL
#[derive(Debug, Deserialize, Validate)]
pub struct DocumentProcessRequest {
    #[validate(url)]
    pub file_url: String,

    #[validate(length(min = 1, max = 255))]
    pub document_id: String,

    #[validate(length(min = 1, max = 255))]
    pub user_id: String,

    #[validate(length(min = 1, max = 1000))]
    pub filename: String,

    /// `pdf` or `docx`, any case
    pub file_type: String,

    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Request to ingest raw text
#[derive(Debug, Deserialize, Validate)]
pub struct TextProcessRequest {
    #[validate(length(min = 1))]
    pub text: String,

    #[validate(length(min = 1, max = 255))]
    pub document_id: String,

    #[validate(length(min = 1, max = 255))]
    pub user_id: String,

    #[validate(length(min = 1, max = 1000))]
    pub title: String,

    /// summary, lecture, notes, ...
    #[serde(default = "default_text_type")]
    pub text_type: String,

    #[serde(default)]
    pub metadata: Option<Value>,
}

fn default_text_type() -> String {
    "summary".to_string()
}

#[derive(Debug, Serialize)]
pub struct ProcessingStatus {
    pub status: DocumentStatus,
    pub message: String,
    pub chunks_created: Option<u64>,
    pub processing_time: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct DocumentProcessResponse {
    pub success: bool,
    pub document_id: String,
    pub processing_status: ProcessingStatus,
    pub chunks_created: Option<u64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListQuery {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "user_id is required"))]
    pub user_id: String,

    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentSummary>,
    pub total_count: usize,
}

/// Register a file document and ingest it in the background
pub async fn process_document(
    State(state): State<AppState>,
    Json(request): Json<DocumentProcessRequest>,
) -> Result<Json<DocumentProcessResponse>> {
    validate_request(&request)?;

    let file_type: FileType = request.file_type.parse()?;
    if !(request.file_url.starts_with("http://") || request.file_url.starts_with("https://")) {
        return Err(AppError::validation("file_url", "file_url must be an http or https URL"));
    }
    let metadata = object_metadata(request.metadata)?;

    state
        .store
        .register_document(NewDocument {
            id: request.document_id.clone(),
            user_id: request.user_id.clone(),
            filename: request.filename.clone(),
            file_type: file_type.to_string(),
            file_url: Some(request.file_url.clone()),
            metadata,
        })
        .await?;

    spawn_ingestion(
        &state,
        IngestionSource::File(DocumentJob {
            document_id: request.document_id.clone(),
            file_url: request.file_url,
            file_type,
        }),
    );

    tracing::info!(
        document_id = %request.document_id,
        user_id = %request.user_id,
        file_type = %file_type,
        "Document processing started"
    );

    Ok(Json(started(request.document_id)))
}

/// Register a raw-text document and ingest it in the background
pub async fn process_text(
    State(state): State<AppState>,
    Json(request): Json<TextProcessRequest>,
) -> Result<Json<DocumentProcessResponse>> {
    validate_request(&request)?;
    if request.text.trim().is_empty() {
        return Err(AppError::validation("text", "text cannot be blank"));
    }

    let mut metadata = object_metadata(request.metadata)?;
    if let Value::Object(map) = &mut metadata {
        map.insert("text_type".to_string(), Value::String(request.text_type.clone()));
    }

    state
        .store
        .register_document(NewDocument {
            id: request.document_id.clone(),
            user_id: request.user_id.clone(),
            filename: request.title,
            file_type: "text".to_string(),
            file_url: None,
            metadata,
        })
        .await?;

    spawn_ingestion(
        &state,
        IngestionSource::Text {
            document_id: request.document_id.clone(),
            text: request.text,
        },
    );

    tracing::info!(
        document_id = %request.document_id,
        user_id = %request.user_id,
        text_type = %request.text_type,
        "Text processing started"
    );

    Ok(Json(started(request.document_id)))
}

/// Processing status and chunk count of one document
pub async fn document_status(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<DocumentSummary>> {
    validate_request(&owner)?;

    let summary = state
        .store
        .find_document(&document_id, &owner.user_id)
        .await?
        .ok_or(AppError::DocumentNotFound { id: document_id })?;

    Ok(Json(summary))
}

/// Owner's documents, newest first, optionally filtered by status
pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentListResponse>> {
    validate_request(&query)?;

    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(DocumentStatus::parse(raw).ok_or_else(|| {
            AppError::validation(
                "status",
                format!("Unknown status '{}', expected processing, completed or failed", raw),
            )
        })?),
        None => None,
    };

    let documents = state.store.list_documents(&query.user_id, status).await?;
    Ok(Json(DocumentListResponse {
        total_count: documents.len(),
        documents,
    }))
}

/// Delete a document and its chunks
pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<Value>> {
    validate_request(&owner)?;

    if !state.store.delete_document(&document_id, &owner.user_id).await? {
        return Err(AppError::DocumentNotFound { id: document_id });
    }

    tracing::info!(document_id = %document_id, user_id = %owner.user_id, "Document deleted");
    Ok(Json(json!({ "message": "Document deleted successfully" })))
}

fn spawn_ingestion(state: &AppState, source: IngestionSource) {
    let processor = state.ingestion.clone();
    tokio::spawn(async move {
        // Outcome is logged and recorded as the document status.
        let _ = processor.run(source).await;
    });
}

fn started(document_id: String) -> DocumentProcessResponse {
    DocumentProcessResponse {
        success: true,
        document_id,
        processing_status: ProcessingStatus {
            status: DocumentStatus::Processing,
            message: "Document processing started in background".to_string(),
            chunks_created: None,
            processing_time: None,
        },
        chunks_created: None,
    }
}

fn object_metadata(metadata: Option<Value>) -> Result<Value> {
    match metadata {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(Value::Object(map)) => Ok(Value::Object(map)),
        Some(_) => Err(AppError::validation("metadata", "metadata must be a JSON object")),
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use axum::http::StatusCode;
    use docrag_common::db::models::DocumentStatus;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn long_text() -> String {
        (1..=6)
            .map(|i| format!("Sentence {} {}.", i, "word ".repeat(38).trim()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn text_request(document_id: &str, user_id: &str, text: &str) -> Value {
        json!({
            "text": text,
            "document_id": document_id,
            "user_id": user_id,
            "title": "Lecture 1",
            "metadata": { "course": "bio-101" }
        })
    }

    async fn wait_for_status(app: axum::Router, uri: &str, expected: &str) -> Value {
        for _ in 0..100 {
            let (_, body) = send(app.clone(), get(uri)).await;
            if body["status"] == expected {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("document never reached status {expected}");
    }

    #[tokio::test]
    async fn test_process_text_completes_in_background() {
        let app = make_app(make_state());

        let (status, body) = send(
            app.clone(),
            post_json("/documents/process-text", text_request("doc-1", "alice", &long_text())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["processing_status"]["status"], "processing");

        let summary = wait_for_status(app, "/documents/status/doc-1?user_id=alice", "completed").await;
        assert!(summary["chunk_count"].as_u64().unwrap() >= 2);
        assert_eq!(summary["filename"], "Lecture 1");
        assert_eq!(summary["file_type"], "text");
    }

    #[tokio::test]
    async fn test_process_text_without_chunks_fails() {
        let app = make_app(make_state());
        let (status, _) = send(
            app.clone(),
            post_json("/documents/process-text", text_request("doc-1", "alice", "Short.")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let summary = wait_for_status(app, "/documents/status/doc-1?user_id=alice", "failed").await;
        assert_eq!(summary["chunk_count"], 0);
    }

    #[tokio::test]
    async fn test_process_document_validation() {
        let app = make_app(make_state());
        let base = json!({
            "file_url": "https://example.com/report.pdf",
            "document_id": "doc-1",
            "user_id": "alice",
            "filename": "report.pdf",
            "file_type": "pdf"
        });

        let mut bad_type = base.clone();
        bad_type["file_type"] = json!("txt");
        let (status, body) = send(app.clone(), post_json("/documents/process", bad_type)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let mut bad_url = base.clone();
        bad_url["file_url"] = json!("not a url");
        let (status, _) = send(app.clone(), post_json("/documents/process", bad_url)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut ftp = base.clone();
        ftp["file_url"] = json!("ftp://example.com/report.pdf");
        let (status, _) = send(app.clone(), post_json("/documents/process", ftp)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut no_owner = base.clone();
        no_owner["user_id"] = json!("");
        let (status, _) = send(app.clone(), post_json("/documents/process", no_owner)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut bad_metadata = base;
        bad_metadata["metadata"] = json!([1, 2]);
        let (status, _) = send(app, post_json("/documents/process", bad_metadata)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_process_document_download_failure_marks_failed() {
        let app = make_app(make_state());
        let request = json!({
            // Nothing listens on port 9 locally, so the download fails fast
            "file_url": "http://127.0.0.1:9/report.PDF",
            "document_id": "doc-1",
            "user_id": "alice",
            "filename": "report.pdf",
            "file_type": "PDF"
        });

        let (status, _) = send(app.clone(), post_json("/documents/process", request)).await;
        assert_eq!(status, StatusCode::OK);

        let summary = wait_for_status(app, "/documents/status/doc-1?user_id=alice", "failed").await;
        assert_eq!(summary["file_type"], "pdf");
    }

    #[tokio::test]
    async fn test_resubmission_by_other_owner_conflicts() {
        let app = make_app(make_state());
        let (status, _) = send(
            app.clone(),
            post_json("/documents/process-text", text_request("doc-1", "alice", &long_text())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            app,
            post_json("/documents/process-text", text_request("doc-1", "mallory", &long_text())),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_status_is_owner_scoped() {
        let app = make_app(make_state());
        send(
            app.clone(),
            post_json("/documents/process-text", text_request("doc-1", "alice", &long_text())),
        )
        .await;

        let (status, _) = send(app.clone(), get("/documents/status/doc-1?user_id=bob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app.clone(), get("/documents/status/missing?user_id=alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app, get("/documents/status/doc-1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let app = make_app(make_state());
        for id in ["doc-1", "doc-2"] {
            send(
                app.clone(),
                post_json("/documents/process-text", text_request(id, "alice", &long_text())),
            )
            .await;
        }
        wait_for_status(app.clone(), "/documents/status/doc-1?user_id=alice", "completed").await;
        wait_for_status(app.clone(), "/documents/status/doc-2?user_id=alice", "completed").await;

        let (status, body) = send(app.clone(), get("/documents/list?user_id=alice&status=completed")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_count"], 2);

        let (_, body) = send(app.clone(), get("/documents/list?user_id=alice&status=failed")).await;
        assert_eq!(body["total_count"], 0);

        let (status, _) = send(app.clone(), get("/documents/list?user_id=alice&status=bogus")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app.clone(), delete("/documents/doc-1?user_id=bob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(app.clone(), delete("/documents/doc-1?user_id=alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Document deleted successfully");

        let (_, body) = send(app, get("/documents/list?user_id=alice")).await;
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["documents"][0]["document_id"], "doc-2");
        assert_eq!(body["documents"][0]["status"], DocumentStatus::Completed.as_str());
    }
}
