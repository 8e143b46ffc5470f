//! Ingestion error types

use docrag_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("File size {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Failed to extract text from {file_type}: {message}")]
    Extraction { file_type: String, message: String },

    #[error("No chunks produced from document text")]
    NoChunks,

    #[error(transparent)]
    App(#[from] AppError),
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::Download { url, message } => AppError::Download {
                message: format!("{}: {}", url, message),
            },
            IngestionError::FileTooLarge { size, limit } => AppError::PayloadTooLarge { size, limit },
            IngestionError::UnsupportedFileType(file_type) => AppError::UnsupportedFileType { file_type },
            IngestionError::Extraction { file_type, message } => AppError::Extraction {
                message: format!("{}: {}", file_type, message),
            },
            IngestionError::NoChunks => AppError::Extraction {
                message: "no chunks produced from document text".to_string(),
            },
            IngestionError::App(e) => e,
        }
    }
}
