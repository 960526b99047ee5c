//! Chunked vector storage over SQLite.
//!
//! The [`VectorStore`] persists text chunks with their embeddings and serves
//! similarity queries over them. It owns the backing connection pool: the
//! pool is built lazily (no connection is opened until the first query) so
//! processes that never touch storage never pay the connection cost, and
//! pool size / acquire timeout come straight from [`StoreConfig`].
//!
//! Similarity scoring happens in-process: candidate rows are narrowed by SQL
//! (keyword, domain, source type, minimum credibility via `json_extract`) and
//! scored by cosine similarity in Rust, renormalizing stored vectors that
//! drift from unit length.
//!
//! The cache ledger (see [`ledger`]) shares this store's pool handle; the
//! store remains the single owner of the pool lifecycle.

pub mod ledger;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::types::SourceType;

/// Norm drift tolerated before a vector is renormalized.
const NORM_EPSILON: f32 = 1e-3;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id          TEXT PRIMARY KEY,
    keyword     TEXT NOT NULL,
    source_id   TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    text        TEXT NOT NULL,
    embedding   TEXT,
    metadata    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_keyword ON chunks(keyword);

CREATE TABLE IF NOT EXISTS cache_entries (
    id                 TEXT PRIMARY KEY,
    keyword            TEXT NOT NULL,
    normalized_keyword TEXT NOT NULL UNIQUE,
    summary            TEXT NOT NULL,
    chunk_ids          TEXT NOT NULL,
    hit_count          INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL,
    last_accessed_at   TEXT NOT NULL,
    expires_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_created ON cache_entries(created_at);
"#;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// The connection pool could not hand out a connection in time.
    #[error("storage unavailable: {0}")]
    #[diagnostic(
        code(keywordsmith::store::resource_unavailable),
        help("The pool is exhausted or the database is unreachable; retry with backoff.")
    )]
    ResourceUnavailable(String),

    #[error("sqlx error: {0}")]
    #[diagnostic(code(keywordsmith::store::sqlx))]
    Sqlx(sqlx::Error),

    #[error("encoding error: {0}")]
    #[diagnostic(code(keywordsmith::store::encoding))]
    Encoding(#[from] serde_json::Error),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    #[diagnostic(
        code(keywordsmith::store::dimension),
        help("The embedder and store must agree on vector dimensionality.")
    )]
    DimensionMismatch { expected: usize, got: usize },
}

impl StoreError {
    fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                StoreError::ResourceUnavailable("connection pool exhausted".to_string())
            }
            sqlx::Error::PoolClosed => {
                StoreError::ResourceUnavailable("connection pool closed".to_string())
            }
            other => StoreError::Sqlx(other),
        }
    }

    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::ResourceUnavailable(_))
    }
}

/// A chunk with its embedding, as persisted by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    /// Normalized keyword this chunk was cached under.
    pub keyword: String,
    /// Groups the chunks cut from one source document.
    pub source_id: String,
    /// Dense, zero-based position within the source.
    pub chunk_index: usize,
    pub text: String,
    /// Absent when embedding generation failed; the chunk is still stored.
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub fn new(
        keyword: impl Into<String>,
        source_id: impl Into<String>,
        chunk_index: usize,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            keyword: keyword.into(),
            source_id: source_id.into(),
            chunk_index,
            text: text.into(),
            embedding: None,
            metadata: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// One chunk that failed to persist, with the reason.
#[derive(Clone, Debug)]
pub struct FailedChunk {
    pub id: String,
    pub reason: String,
    /// Whether retrying just this chunk may succeed.
    pub transient: bool,
}

/// Per-chunk outcome of a batched insert.
///
/// A partial failure is never silent: every chunk lands either in `stored`
/// or in `failed`, and callers may retry only the failed ones.
#[derive(Clone, Debug, Default)]
pub struct BatchInsertReport {
    pub stored: Vec<String>,
    pub failed: Vec<FailedChunk>,
}

impl BatchInsertReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Optional narrowing applied before similarity scoring.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchFilters {
    pub keyword: Option<String>,
    pub domain: Option<String>,
    pub source_type: Option<SourceType>,
    pub min_credibility: Option<f32>,
}

/// A chunk paired with its similarity score, in [0, 1].
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
}

/// SQLite-backed chunk store and pool owner.
pub struct VectorStore {
    pool: SqlitePool,
    config: StoreConfig,
    schema_ready: OnceCell<()>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("dimension", &self.config.embedding_dimension)
            .finish()
    }
}

impl VectorStore {
    /// Build the store around a lazily-connected pool.
    ///
    /// No connection is opened here; the first query warms the pool. Pool
    /// exhaustion later surfaces as [`StoreError::ResourceUnavailable`].
    pub fn connect_lazy(config: StoreConfig) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy(&config.connection_string)
            .map_err(StoreError::from_sqlx)?;
        Ok(Self {
            pool,
            config,
            schema_ready: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The shared pool handle.
    ///
    /// The ledger borrows this; the store remains the owner of the pool
    /// lifecycle. Also useful for maintenance queries the store API does not
    /// cover.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotently create the schema on first use.
    pub(crate) async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.schema_ready
            .get_or_try_init(|| async {
                let mut conn = self.pool.acquire().await.map_err(StoreError::from_sqlx)?;
                sqlx::raw_sql(SCHEMA)
                    .execute(&mut *conn)
                    .await
                    .map_err(StoreError::from_sqlx)?;
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }

    /// Batched insert with per-chunk outcome reporting.
    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    pub async fn store_chunks(
        &self,
        chunks: Vec<ChunkRecord>,
    ) -> Result<BatchInsertReport, StoreError> {
        self.ensure_schema().await?;
        let mut report = BatchInsertReport::default();
        for chunk in chunks {
            match self.insert_one(&chunk).await {
                Ok(()) => report.stored.push(chunk.id),
                Err(err) => report.failed.push(FailedChunk {
                    id: chunk.id,
                    transient: err.is_transient(),
                    reason: err.to_string(),
                }),
            }
        }
        Ok(report)
    }

    async fn insert_one(&self, chunk: &ChunkRecord) -> Result<(), StoreError> {
        let embedding_json = match &chunk.embedding {
            Some(vector) => {
                if vector.len() != self.config.embedding_dimension {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.config.embedding_dimension,
                        got: vector.len(),
                    });
                }
                Some(serde_json::to_string(vector)?)
            }
            None => None,
        };
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO chunks
                (id, keyword, source_id, chunk_index, text, embedding, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.keyword)
        .bind(&chunk.source_id)
        .bind(chunk.chunk_index as i64)
        .bind(&chunk.text)
        .bind(embedding_json)
        .bind(chunk.metadata.to_string())
        .bind(chunk.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Similarity search over stored chunks.
    ///
    /// Returns chunks whose similarity to `query` is at least `threshold`
    /// (inclusive), ordered descending by score and capped at `limit`. An
    /// empty result is valid, not an error.
    #[instrument(skip(self, query, filters))]
    pub async fn search(
        &self,
        query: &[f32],
        threshold: f32,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if query.len() != self.config.embedding_dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.embedding_dimension,
                got: query.len(),
            });
        }
        self.ensure_schema().await?;

        let mut sql = String::from(
            "SELECT id, keyword, source_id, chunk_index, text, embedding, metadata, created_at \
             FROM chunks WHERE embedding IS NOT NULL",
        );
        if filters.keyword.is_some() {
            sql.push_str(" AND keyword = ?");
        }
        if filters.domain.is_some() {
            sql.push_str(" AND json_extract(metadata, '$.source.domain') = ?");
        }
        if filters.source_type.is_some() {
            sql.push_str(" AND json_extract(metadata, '$.source.source_type') = ?");
        }
        if filters.min_credibility.is_some() {
            sql.push_str(
                " AND CAST(json_extract(metadata, '$.source.credibility_score') AS REAL) >= ?",
            );
        }

        let mut db_query = sqlx::query(&sql);
        if let Some(keyword) = &filters.keyword {
            db_query = db_query.bind(keyword);
        }
        if let Some(domain) = &filters.domain {
            db_query = db_query.bind(domain);
        }
        if let Some(source_type) = &filters.source_type {
            db_query = db_query.bind(source_type.as_str());
        }
        if let Some(min) = filters.min_credibility {
            db_query = db_query.bind(min);
        }

        let rows = db_query
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        let query_vec = renormalize(query);
        let mut scored = Vec::new();
        for row in rows {
            let chunk = decode_chunk_row(&row)?;
            let Some(embedding) = chunk.embedding.as_deref() else {
                continue;
            };
            if embedding.len() != query_vec.len() {
                continue;
            }
            let score = similarity(&query_vec, &renormalize(embedding));
            if score >= threshold {
                scored.push(ScoredChunk { chunk, score });
            }
        }
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Fetch chunks by id, in chunk-index order.
    ///
    /// Ids with no backing row are simply absent from the result.
    pub async fn chunks_by_ids(&self, ids: &[String]) -> Result<Vec<ChunkRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_schema().await?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, keyword, source_id, chunk_index, text, embedding, metadata, created_at \
             FROM chunks WHERE id IN ({placeholders}) ORDER BY source_id, chunk_index",
        );
        let mut db_query = sqlx::query(&sql);
        for id in ids {
            db_query = db_query.bind(id);
        }
        let rows = db_query
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        rows.iter().map(decode_chunk_row).collect()
    }

    /// All chunks cached under a normalized keyword, in chunk-index order.
    pub async fn chunks_by_keyword(&self, keyword: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT id, keyword, source_id, chunk_index, text, embedding, metadata, created_at \
             FROM chunks WHERE keyword = ? ORDER BY source_id, chunk_index",
        )
        .bind(keyword)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        rows.iter().map(decode_chunk_row).collect()
    }

    /// Total chunk rows in the store.
    pub async fn count(&self) -> Result<usize, StoreError> {
        self.ensure_schema().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(count as usize)
    }

    /// Delete chunks whose keyword has no ledger entry.
    ///
    /// Chunks are written before the cache entry that references them, so a
    /// crash between the two writes can leave chunks with no referencing
    /// entry. This sweep reclaims them; it is safe to run at any time.
    #[instrument(skip(self))]
    pub async fn delete_orphan_chunks(&self) -> Result<u64, StoreError> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            "DELETE FROM chunks WHERE keyword NOT IN \
             (SELECT normalized_keyword FROM cache_entries)",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}

fn decode_chunk_row(row: &SqliteRow) -> Result<ChunkRecord, StoreError> {
    let embedding = row
        .try_get::<Option<String>, _>("embedding")
        .map_err(StoreError::from_sqlx)?
        .map(|raw| serde_json::from_str::<Vec<f32>>(&raw))
        .transpose()?;
    let metadata_raw: String = row.try_get("metadata").map_err(StoreError::from_sqlx)?;
    Ok(ChunkRecord {
        id: row.try_get("id").map_err(StoreError::from_sqlx)?,
        keyword: row.try_get("keyword").map_err(StoreError::from_sqlx)?,
        source_id: row.try_get("source_id").map_err(StoreError::from_sqlx)?,
        chunk_index: row
            .try_get::<i64, _>("chunk_index")
            .map_err(StoreError::from_sqlx)? as usize,
        text: row.try_get("text").map_err(StoreError::from_sqlx)?,
        embedding,
        metadata: serde_json::from_str(&metadata_raw)?,
        created_at: row.try_get("created_at").map_err(StoreError::from_sqlx)?,
    })
}

/// Similarity in [0, 1]: one minus the cosine distance between unit vectors.
fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let cosine_distance = 1.0 - dot;
    (1.0 - cosine_distance).clamp(0.0, 1.0)
}

/// Scale a vector back to unit length when its norm has drifted.
///
/// Embedders are expected to hand over pre-normalized vectors; this guards
/// against the ones that do not.
fn renormalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && (norm - 1.0).abs() > NORM_EPSILON {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}
