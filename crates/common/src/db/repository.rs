//! PostgreSQL + pgvector implementation of [`ChunkStore`]
//!
//! Plain lookups go through the SeaORM entities. Anything touching the
//! `embedding` column is a raw statement that binds the vector as a text
//! literal and casts it with `::vector`.

use crate::db::models::*;
use crate::db::store::{
    ChunkRecord, ChunkStore, DocumentSummary, NewDocument, OwnerStats, RankQuery, RankedChunk,
    StoredChunk,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::vector::Embedding;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::prelude::{DateTimeWithTimeZone, Json};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, Statement, TransactionTrait, Value,
};
use tracing::{debug, instrument};

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
    dimension: usize,
}

#[derive(Debug, FromQueryResult)]
struct SummaryRow {
    id: String,
    filename: String,
    file_type: String,
    status: String,
    chunk_count: i64,
    created_at: DateTimeWithTimeZone,
    updated_at: DateTimeWithTimeZone,
}

#[derive(Debug, FromQueryResult)]
struct RankedRow {
    chunk_id: String,
    document_id: String,
    content: String,
    chunk_index: i32,
    similarity: f64,
    chunk_metadata: Json,
    document_metadata: Json,
    filename: String,
}

#[derive(Debug, FromQueryResult)]
struct StoredChunkRow {
    chunk_id: String,
    document_id: String,
    content: String,
    chunk_index: i32,
    metadata: Json,
    embedding: String,
}

#[derive(Debug, FromQueryResult)]
struct StatsRow {
    total_documents: i64,
    completed_documents: i64,
    total_chunks: i64,
    completed_chunks: i64,
}

impl Repository {
    /// Create a repository whose vectors have `dimension` entries
    pub fn new(pool: DbPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

/// `AND dc.document_id IN ($n, $n+1, ...)` with its bound values
fn document_filter(ids: &[String], first_placeholder: usize) -> (String, Vec<Value>) {
    let placeholders: Vec<String> = (0..ids.len())
        .map(|i| format!("${}", first_placeholder + i))
        .collect();
    let clause = format!("AND dc.document_id IN ({})", placeholders.join(", "));
    let values = ids.iter().cloned().map(Value::from).collect();
    (clause, values)
}

fn summary_from_model(document: Document, chunk_count: u64) -> DocumentSummary {
    DocumentSummary {
        status: document.document_status(),
        document_id: document.id,
        filename: document.filename,
        file_type: document.file_type,
        chunk_count,
        created_at: document.created_at.with_timezone(&Utc),
        updated_at: document.updated_at.with_timezone(&Utc),
    }
}

impl From<SummaryRow> for DocumentSummary {
    fn from(row: SummaryRow) -> Self {
        Self {
            document_id: row.id,
            filename: row.filename,
            file_type: row.file_type,
            status: DocumentStatus::from(row.status),
            chunk_count: row.chunk_count.max(0) as u64,
            created_at: row.created_at.with_timezone(&Utc),
            updated_at: row.updated_at.with_timezone(&Utc),
        }
    }
}

#[async_trait]
impl ChunkStore for Repository {
    // ========================================================================
    // Document Operations
    // ========================================================================

    #[instrument(skip(self, document), fields(document_id = %document.id))]
    async fn register_document(&self, document: NewDocument) -> Result<()> {
        // The WHERE on the conflict branch leaves foreign-owned rows untouched,
        // which shows up as zero affected rows.
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO documents (
                id, user_id, filename, file_type, file_url, status, metadata,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 'processing', $6, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE SET
                filename = EXCLUDED.filename,
                file_type = EXCLUDED.file_type,
                file_url = EXCLUDED.file_url,
                metadata = EXCLUDED.metadata,
                status = 'processing',
                updated_at = NOW()
            WHERE documents.user_id = EXCLUDED.user_id
            "#,
            vec![
                document.id.clone().into(),
                document.user_id.into(),
                document.filename.into(),
                document.file_type.into(),
                document.file_url.into(),
                document.metadata.into(),
            ],
        );

        let result = self.write_conn().execute(stmt).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict {
                message: format!("Document {} belongs to another user", document.id),
            });
        }
        Ok(())
    }

    async fn set_document_status(&self, document_id: &str, status: DocumentStatus) -> Result<bool> {
        let result = DocumentEntity::update_many()
            .col_expr(DocumentColumn::Status, Expr::value(status.as_str()))
            .col_expr(DocumentColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(DocumentColumn::Id.eq(document_id))
            .filter(DocumentColumn::Status.eq(DocumentStatus::Processing.as_str()))
            .exec(self.write_conn())
            .await?;

        debug!(document_id, status = %status, updated = result.rows_affected, "Document status update");
        Ok(result.rows_affected > 0)
    }

    async fn find_document(&self, document_id: &str, owner_id: &str) -> Result<Option<DocumentSummary>> {
        let document = DocumentEntity::find_by_id(document_id.to_string())
            .filter(DocumentColumn::UserId.eq(owner_id))
            .one(self.read_conn())
            .await?;

        match document {
            Some(document) => {
                let chunk_count = self.count_chunks(document_id).await?;
                Ok(Some(summary_from_model(document, chunk_count)))
            }
            None => Ok(None),
        }
    }

    async fn list_documents(
        &self,
        owner_id: &str,
        status: Option<DocumentStatus>,
    ) -> Result<Vec<DocumentSummary>> {
        let mut values: Vec<Value> = vec![owner_id.into()];
        let status_filter = match status {
            Some(status) => {
                values.push(status.as_str().into());
                "AND d.status = $2"
            }
            None => "",
        };

        let sql = format!(
            r#"
            SELECT d.id, d.filename, d.file_type, d.status, d.created_at, d.updated_at,
                   COUNT(dc.id) AS chunk_count
            FROM documents d
            LEFT JOIN document_chunks dc ON d.id = dc.document_id
            WHERE d.user_id = $1
            {}
            GROUP BY d.id
            ORDER BY d.created_at DESC, d.id ASC
            "#,
            status_filter
        );

        let rows = SummaryRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            values,
        ))
        .all(self.read_conn())
        .await?;

        Ok(rows.into_iter().map(DocumentSummary::from).collect())
    }

    async fn delete_document(&self, document_id: &str, owner_id: &str) -> Result<bool> {
        let result = DocumentEntity::delete_many()
            .filter(DocumentColumn::Id.eq(document_id))
            .filter(DocumentColumn::UserId.eq(owner_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Chunk Operations
    // ========================================================================

    #[instrument(skip(self, chunks), fields(chunks = chunks.len()))]
    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        for chunk in chunks {
            chunk.embedding.ensure_dimension(self.dimension)?;
        }

        let txn = self.write_conn().begin().await?;

        for chunk in chunks {
            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO document_chunks (
                    id, document_id, content, chunk_index, embedding, metadata, created_at
                )
                VALUES ($1, $2, $3, $4, $5::vector, $6, NOW())
                ON CONFLICT (document_id, chunk_index) DO UPDATE SET
                    id = EXCLUDED.id,
                    content = EXCLUDED.content,
                    embedding = EXCLUDED.embedding,
                    metadata = EXCLUDED.metadata,
                    created_at = EXCLUDED.created_at
                "#,
                vec![
                    chunk.chunk_id.clone().into(),
                    chunk.document_id.clone().into(),
                    chunk.content.clone().into(),
                    chunk.chunk_index.into(),
                    chunk.embedding.to_pg_literal().into(),
                    chunk.metadata.clone().into(),
                ],
            );
            txn.execute(stmt).await?;
        }

        txn.commit().await.map_err(|e| AppError::Transaction {
            message: format!("Chunk upsert commit failed: {}", e),
        })?;

        debug!(chunks = chunks.len(), "Chunks upserted");
        Ok(())
    }

    async fn prune_chunks(&self, document_id: &str, keep: usize) -> Result<u64> {
        let keep = i32::try_from(keep).unwrap_or(i32::MAX);
        let result = ChunkEntity::delete_many()
            .filter(ChunkColumn::DocumentId.eq(document_id))
            .filter(ChunkColumn::ChunkIndex.gte(keep))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected)
    }

    async fn count_chunks(&self, document_id: &str) -> Result<u64> {
        ChunkEntity::find()
            .filter(ChunkColumn::DocumentId.eq(document_id))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_chunk(&self, chunk_id: &str, owner_id: &str) -> Result<Option<StoredChunk>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT dc.id AS chunk_id, dc.document_id, dc.content, dc.chunk_index,
                   dc.metadata, dc.embedding::text AS embedding
            FROM document_chunks dc
            JOIN documents d ON dc.document_id = d.id
            WHERE dc.id = $1 AND d.user_id = $2
            "#,
            vec![chunk_id.into(), owner_id.into()],
        );

        let row = StoredChunkRow::find_by_statement(stmt)
            .one(self.read_conn())
            .await?;

        row.map(|row| {
            Ok(StoredChunk {
                embedding: Embedding::parse_pg_literal(&row.embedding)?,
                chunk_id: row.chunk_id,
                document_id: row.document_id,
                content: row.content,
                chunk_index: row.chunk_index,
                metadata: row.metadata,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, query), fields(owner_id = %query.owner_id, top_k = query.top_k))]
    async fn rank(&self, query: &RankQuery) -> Result<Vec<RankedChunk>> {
        query.vector.ensure_dimension(self.dimension)?;
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let mut values: Vec<Value> = vec![
            query.vector.to_pg_literal().into(),
            query.owner_id.clone().into(),
            f64::from(query.min_similarity).into(),
            (query.top_k as i64).into(),
        ];

        let document_clause = match &query.document_ids {
            Some(ids) if ids.is_empty() => return Ok(Vec::new()),
            Some(ids) => {
                let (clause, ids) = document_filter(ids, values.len() + 1);
                values.extend(ids);
                clause
            }
            None => String::new(),
        };

        let sql = format!(
            r#"
            SELECT
                dc.id AS chunk_id,
                dc.document_id,
                dc.content,
                dc.chunk_index,
                dc.metadata AS chunk_metadata,
                d.metadata AS document_metadata,
                d.filename,
                1 - (dc.embedding <=> $1::vector) AS similarity
            FROM document_chunks dc
            JOIN documents d ON dc.document_id = d.id
            WHERE d.user_id = $2
              AND d.status = 'completed'
              AND 1 - (dc.embedding <=> $1::vector) >= $3
              {}
            ORDER BY similarity DESC, dc.id ASC
            LIMIT $4
            "#,
            document_clause
        );

        let rows = RankedRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            values,
        ))
        .all(self.read_conn())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RankedChunk {
                chunk_id: row.chunk_id,
                document_id: row.document_id,
                content: row.content,
                chunk_index: row.chunk_index,
                similarity: row.similarity as f32,
                chunk_metadata: row.chunk_metadata,
                document_metadata: row.document_metadata,
                filename: row.filename,
            })
            .collect())
    }

    // ========================================================================
    // Stats & Health
    // ========================================================================

    async fn owner_stats(&self, owner_id: &str) -> Result<OwnerStats> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                COUNT(DISTINCT d.id) AS total_documents,
                COUNT(DISTINCT d.id) FILTER (WHERE d.status = 'completed') AS completed_documents,
                COUNT(dc.id) AS total_chunks,
                COUNT(dc.id) FILTER (WHERE d.status = 'completed') AS completed_chunks
            FROM documents d
            LEFT JOIN document_chunks dc ON d.id = dc.document_id
            WHERE d.user_id = $1
            "#,
            vec![owner_id.into()],
        );

        let row = StatsRow::find_by_statement(stmt).one(self.read_conn()).await?;

        Ok(match row {
            Some(row) => {
                let completed_documents = row.completed_documents.max(0) as u64;
                OwnerStats {
                    total_documents: row.total_documents.max(0) as u64,
                    completed_documents,
                    total_chunks: row.total_chunks.max(0) as u64,
                    avg_chunks_per_document: OwnerStats::average(
                        completed_documents,
                        row.completed_chunks.max(0) as u64,
                    ),
                }
            }
            None => OwnerStats::default(),
        })
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
