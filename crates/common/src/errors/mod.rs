//! Error types for DocRAG services
//!
//! Every fallible operation in the workspace returns [`AppError`]. Each
//! variant maps to a machine-readable [`ErrorCode`] and an HTTP status, and
//! the axum [`IntoResponse`] impl renders the structured JSON body the
//! gateway sends back to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input errors (1xxx)
    ValidationError,
    PayloadTooLarge,
    UnsupportedFileType,

    // Resource errors (4xxx)
    DocumentNotFound,
    ChunkNotFound,

    // Conflict errors (5xxx)
    Conflict,

    // Rate limiting (6xxx)
    RateLimited,

    // Storage errors (7xxx)
    DatabaseError,
    ConnectionError,
    TransactionError,

    // External service errors (8xxx)
    DownloadError,
    ExtractionError,
    EmbeddingError,
    EmbeddingTimeout,
    DimensionMismatch,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::PayloadTooLarge => 1002,
            ErrorCode::UnsupportedFileType => 1003,

            ErrorCode::DocumentNotFound => 4001,
            ErrorCode::ChunkNotFound => 4002,

            ErrorCode::Conflict => 5001,

            ErrorCode::RateLimited => 6001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::TransactionError => 7003,

            ErrorCode::DownloadError => 8002,
            ErrorCode::ExtractionError => 8003,
            ErrorCode::EmbeddingError => 8004,
            ErrorCode::EmbeddingTimeout => 8005,
            ErrorCode::DimensionMismatch => 8006,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Input errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Unsupported file type: {file_type}")]
    UnsupportedFileType { file_type: String },

    // Resource errors
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Chunk not found: {id}")]
    ChunkNotFound { id: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Transaction failed: {message}")]
    Transaction { message: String },

    // External service errors
    #[error("Download failed: {message}")]
    Download { message: String },

    #[error("Text extraction failed: {message}")]
    Extraction { message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl AppError {
    /// Shorthand for a validation failure on a named field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::UnsupportedFileType { .. } => ErrorCode::UnsupportedFileType,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::ChunkNotFound { .. } => ErrorCode::ChunkNotFound,
            AppError::Conflict { .. } => ErrorCode::Conflict,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Transaction { .. } => ErrorCode::TransactionError,
            AppError::Download { .. } => ErrorCode::DownloadError,
            AppError::Extraction { .. } => ErrorCode::ExtractionError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::UnsupportedFileType { .. } => {
                StatusCode::BAD_REQUEST
            }

            AppError::DocumentNotFound { .. } | AppError::ChunkNotFound { .. } => {
                StatusCode::NOT_FOUND
            }

            AppError::Conflict { .. } => StatusCode::CONFLICT,

            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            AppError::Extraction { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            AppError::Database(_)
            | AppError::Transaction { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,

            AppError::Download { .. }
            | AppError::EmbeddingError { .. }
            | AppError::DimensionMismatch { .. } => StatusCode::BAD_GATEWAY,

            AppError::DatabaseConnection { .. } => StatusCode::SERVICE_UNAVAILABLE,

            AppError::EmbeddingTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation {
                field: Some(field), ..
            } => Some(serde_json::json!({ "field": field })),
            AppError::DimensionMismatch { expected, actual } => {
                Some(serde_json::json!({ "expected": expected, "actual": actual }))
            }
            _ => None,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorDetails {
                code,
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::DocumentNotFound { id: "doc-1".into() };
        assert_eq!(err.code(), ErrorCode::DocumentNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = AppError::ChunkNotFound { id: "c-1".into() };
        assert_eq!(err.code().as_code(), 4002);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("top_k", "top_k cannot exceed 20");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
        assert_eq!(err.details(), Some(serde_json::json!({ "field": "top_k" })));
    }

    #[test]
    fn test_embedding_errors_are_upstream_failures() {
        let err = AppError::EmbeddingError {
            message: "model unavailable".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.is_server_error());

        let err = AppError::EmbeddingTimeout { timeout_ms: 30_000 };
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let err = AppError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert_eq!(err.code(), ErrorCode::DimensionMismatch);
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: expected 384, got 768"
        );
    }

    #[test]
    fn test_download_and_storage_mapping() {
        let err = AppError::Download {
            message: "HTTP error: 404".into(),
        };
        assert_eq!(err.code().as_code(), 8002);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let err = AppError::Transaction {
            message: "commit failed".into(),
        };
        assert_eq!(err.code(), ErrorCode::TransactionError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err: AppError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[test]
    fn test_server_error() {
        let err = AppError::Internal {
            message: "Something went wrong".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_server_error());
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::DocumentNotFound).unwrap();
        assert_eq!(json, "\"DOCUMENT_NOT_FOUND\"");
    }
}
