//! Health check and service info handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
    pub health_url: String,
    pub metrics_port: u16,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub components: HealthComponents,
}

#[derive(Serialize)]
pub struct HealthComponents {
    pub database_healthy: bool,
    pub embedding_service_healthy: bool,
    pub model_info: ModelInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Serialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub embedding_dimension: usize,
}

/// Service name, version and links
pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "DocRAG Service API".to_string(),
        version: docrag_common::VERSION.to_string(),
        health_url: "/health".to_string(),
        metrics_port: state.config.observability.metrics_port,
    })
}

/// Checks the store and a round trip through the embedding provider
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut errors = Vec::new();

    let database_healthy = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            errors.push(format!("database: {}", e));
            false
        }
    };

    let embedding_service_healthy = match state.embedder.embed("test").await {
        Ok(vector) if vector.len() == state.embedder.dimension() => true,
        Ok(vector) => {
            errors.push(format!(
                "embedding: expected dimension {}, got {}",
                state.embedder.dimension(),
                vector.len()
            ));
            false
        }
        Err(e) => {
            errors.push(format!("embedding: {}", e));
            false
        }
    };

    if !errors.is_empty() {
        tracing::warn!(errors = ?errors, "Health check failed");
    }

    let healthy = database_healthy && embedding_service_healthy;
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: docrag_common::VERSION.to_string(),
        components: HealthComponents {
            database_healthy,
            embedding_service_healthy,
            model_info: ModelInfo {
                model_name: state.embedder.model_name().to_string(),
                embedding_dimension: state.embedder.dimension(),
            },
            errors,
        },
    })
}
