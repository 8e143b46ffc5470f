//! Ingestion processor
//!
//! Core ingestion flow: download, text extraction, chunking, batch
//! embedding and persistence, followed by the document status update.

use crate::chunker::TextChunker;
use crate::download::Downloader;
use crate::errors::IngestionError;
use crate::extract::{extract_text, FileType};
use docrag_common::config::{AppConfig, ChunkStrategy};
use docrag_common::db::models::DocumentStatus;
use docrag_common::db::{ChunkRecord, ChunkStore};
use docrag_common::errors::AppError;
use docrag_common::metrics::record_ingestion;
use docrag_common::{Embedder, Embedding};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// A registered file document waiting to be ingested
#[derive(Debug, Clone)]
pub struct DocumentJob {
    pub document_id: String,
    pub file_url: String,
    pub file_type: FileType,
}

/// Where the text of an ingestion run comes from
#[derive(Debug, Clone)]
pub enum IngestionSource {
    File(DocumentJob),
    Text { document_id: String, text: String },
}

impl IngestionSource {
    pub fn document_id(&self) -> &str {
        match self {
            IngestionSource::File(job) => &job.document_id,
            IngestionSource::Text { document_id, .. } => document_id,
        }
    }
}

/// Ingestion processor
pub struct IngestionProcessor {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    downloader: Downloader,
    chunker: TextChunker,
    strategy: ChunkStrategy,
}

impl IngestionProcessor {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        downloader: Downloader,
        chunker: TextChunker,
        strategy: ChunkStrategy,
    ) -> Self {
        Self {
            store,
            embedder,
            downloader,
            chunker,
            strategy,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IngestionError> {
        Ok(Self::new(
            store,
            embedder,
            Downloader::from_config(&config.ingestion)?,
            TextChunker::from(&config.chunking),
            config.chunking.strategy,
        ))
    }

    /// Chunk, embed and persist `text` as the chunks of `document_id`
    ///
    /// All chunks are embedded with one batch call and written with one
    /// upsert. Chunks left over from an earlier, longer run are pruned
    /// afterwards. Returns the number of chunks stored.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn ingest_text(&self, document_id: &str, text: &str) -> Result<usize, IngestionError> {
        let contents = self.chunker.chunk_with(self.strategy, text);
        if contents.is_empty() {
            return Err(IngestionError::NoChunks);
        }
        debug!(chunk_count = contents.len(), "Text chunked");

        let vectors = self.embedder.embed_batch(&contents).await?;
        if vectors.len() != contents.len() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "expected {} embeddings, received {}",
                    contents.len(),
                    vectors.len()
                ),
            }
            .into());
        }

        let records: Vec<ChunkRecord> = contents
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (content, vector))| ChunkRecord {
                chunk_id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                metadata: json!({
                    "char_count": content.chars().count(),
                    "word_count": content.split_whitespace().count(),
                }),
                content,
                chunk_index: index as i32,
                embedding: Embedding::new(vector),
            })
            .collect();

        self.store.upsert_chunks(&records).await?;
        let pruned = self.store.prune_chunks(document_id, records.len()).await?;
        if pruned > 0 {
            debug!(pruned, "Removed stale chunks from earlier ingestion");
        }

        Ok(records.len())
    }

    /// Download, extract and ingest a file document
    #[instrument(skip(self, job), fields(document_id = %job.document_id, file_type = %job.file_type))]
    pub async fn process_document(&self, job: &DocumentJob) -> Result<usize, IngestionError> {
        info!(file_url = %job.file_url, "Downloading file");
        let bytes = self.downloader.fetch(&job.file_url).await?;

        let file_type = job.file_type;
        let text = tokio::task::spawn_blocking(move || extract_text(file_type, &bytes))
            .await
            .map_err(|e| AppError::Internal {
                message: format!("extraction task failed: {}", e),
            })??;
        info!(chars = text.chars().count(), "Extracted text");

        self.ingest_text(&job.document_id, &text).await
    }

    /// Run one ingestion to completion and record the outcome
    ///
    /// Success marks the document `completed`. Any failure, including text
    /// that yields no chunks, marks it `failed`; a failure to record that
    /// status is logged and the original error is returned.
    pub async fn run(&self, source: IngestionSource) -> Result<usize, IngestionError> {
        let started = Instant::now();
        let document_id = source.document_id().to_string();

        let result = match &source {
            IngestionSource::File(job) => self.process_document(job).await,
            IngestionSource::Text { document_id, text } => self.ingest_text(document_id, text).await,
        };
        let result = match result {
            Ok(created) => self.mark(&document_id, DocumentStatus::Completed).await.map(|_| created),
            Err(e) => Err(e),
        };

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(created) => {
                record_ingestion(elapsed, *created, true);
                info!(
                    document_id = %document_id,
                    chunks_created = created,
                    duration_secs = elapsed,
                    "Document processed"
                );
            }
            Err(e) => {
                record_ingestion(elapsed, 0, false);
                error!(document_id = %document_id, error = %e, "Document processing failed");
                if let Err(status_err) = self.mark(&document_id, DocumentStatus::Failed).await {
                    error!(
                        document_id = %document_id,
                        error = %status_err,
                        "Failed to update document status"
                    );
                }
            }
        }

        result
    }

    async fn mark(&self, document_id: &str, status: DocumentStatus) -> Result<(), IngestionError> {
        let changed = self.store.set_document_status(document_id, status).await?;
        if !changed {
            warn!(document_id, status = %status, "Document was not in processing state, status unchanged");
        }
        Ok(())
    }
}
