//! Database layer for DocRAG
//!
//! Provides:
//! - SeaORM entity models
//! - The [`ChunkStore`] seam with PostgreSQL and in-memory implementations
//! - Connection pool management and schema bootstrap

mod memory;
pub mod models;
mod repository;
mod store;

pub use memory::InMemoryChunkStore;
pub use repository::Repository;
pub use store::{
    ChunkRecord, ChunkStore, DocumentSummary, NewDocument, OwnerStats, RankQuery, RankedChunk,
    StoredChunk,
};

use crate::config::{DatabaseConfig, StoreBackend};
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");
        Ok(Self { conn })
    }

    pub fn read(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn write(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }

    /// Create the pgvector extension, tables and indexes if missing
    ///
    /// The embedding column is sized from `dimension`, so changing models
    /// with a different dimension needs a fresh table.
    pub async fn ensure_schema(&self, dimension: usize) -> Result<()> {
        if dimension == 0 {
            return Err(AppError::Configuration {
                message: "embedding dimension must be positive".to_string(),
            });
        }

        for statement in schema_statements(dimension) {
            self.conn.execute_unprepared(&statement).await?;
        }

        info!(dimension, "Database schema ready");
        Ok(())
    }
}

fn schema_statements(dimension: usize) -> Vec<String> {
    vec![
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_url TEXT,
            status TEXT NOT NULL DEFAULT 'processing',
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        .to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS document_chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                embedding VECTOR({dimension}) NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (document_id, chunk_index)
            )
            "#
        ),
        "CREATE INDEX IF NOT EXISTS idx_documents_user_id ON documents(user_id)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_document_id ON document_chunks(document_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_embedding ON document_chunks \
         USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)"
            .to_string(),
    ]
}

/// Build the configured store
///
/// `dimension` is the embedding dimension every stored vector must have.
pub async fn create_store(config: &DatabaseConfig, dimension: usize) -> Result<Arc<dyn ChunkStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory chunk store");
            Ok(Arc::new(InMemoryChunkStore::new(dimension)))
        }
        StoreBackend::Postgres => {
            let pool = DbPool::new(config).await?;
            if config.auto_migrate {
                pool.ensure_schema(dimension).await?;
            }
            Ok(Arc::new(Repository::new(pool, dimension)))
        }
    }
}
