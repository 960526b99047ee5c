//! Keyword-to-summary cache ledger.
//!
//! One row per normalized keyword, keyed by a deterministic hash id, mapping
//! the keyword to its cached summary and the chunk ids that back it. The
//! ledger tracks hit counts and two distinct expiries:
//!
//! - **soft TTL** (`expires_at`): a stale entry is treated as a miss on
//!   lookup but kept in storage for statistics and audit;
//! - **hard max-age** (by `created_at`): a retention ceiling past which the
//!   sweep physically deletes the entry regardless of hit activity.
//!
//! The ledger shares the [`VectorStore`]'s pool handle; the store owns the
//! pool lifecycle. Writes are single-row; cross-store consistency relies on
//! write ordering (chunks land before the entry that references them, and an
//! entry is deleted before its chunks), so an entry never references a chunk
//! id that does not exist.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use crate::config::LedgerConfig;
use crate::store::{StoreError, VectorStore};
use crate::types::{Keyword, cache_entry_id};

/// One ledger row: a cached research result for one normalized keyword.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Deterministic hash of the normalized keyword.
    pub id: String,
    /// Raw keyword as first supplied, kept for display.
    pub keyword: String,
    pub normalized_keyword: String,
    pub summary: String,
    /// Ids of the chunks persisted for this entry, in storage order.
    pub chunk_ids: Vec<String>,
    pub hit_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// A new entry for a freshly researched keyword.
    ///
    /// `expires_at` is stamped by [`CacheLedger::upsert`]; the placeholder
    /// here is the creation instant.
    pub fn new(keyword: &Keyword, summary: impl Into<String>, chunk_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: keyword.entry_id(),
            keyword: keyword.raw().to_string(),
            normalized_keyword: keyword.normalized().to_string(),
            summary: summary.into(),
            chunk_ids,
            hit_count: 0,
            created_at: now,
            last_accessed_at: now,
            expires_at: now,
        }
    }

    /// Past the soft TTL: treat as a miss, keep the row.
    #[must_use]
    pub fn is_soft_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Past the hard retention ceiling: eligible for physical deletion.
    #[must_use]
    pub fn is_beyond_max_age(&self, now: DateTime<Utc>, max_age: std::time::Duration) -> bool {
        match ChronoDuration::from_std(max_age) {
            Ok(age) => self.created_at + age <= now,
            Err(_) => false,
        }
    }
}

/// Outcome of an exact-match lookup.
///
/// `Stale` carries the entry so callers can distinguish "never cached" from
/// "cached but past its soft TTL" without re-querying.
#[derive(Clone, Debug)]
pub enum LedgerLookup {
    /// Live entry; hit counters were updated as part of the lookup.
    Hit(CacheEntry),
    /// Soft-expired entry; counters untouched, treat as a miss.
    Stale(CacheEntry),
    Miss,
}

/// Cache-ledger operations over the shared store pool.
#[derive(Clone)]
pub struct CacheLedger {
    store: Arc<VectorStore>,
    config: LedgerConfig,
}

impl std::fmt::Debug for CacheLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLedger")
            .field("ttl", &self.config.ttl)
            .field("max_age", &self.config.max_age)
            .finish()
    }
}

impl CacheLedger {
    pub fn new(store: Arc<VectorStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// O(1) lookup by the keyword's deterministic id.
    ///
    /// A live hit increments `hit_count` and refreshes `last_accessed_at`
    /// as a side effect; the returned entry reflects the updated values.
    /// A soft-expired row comes back as [`LedgerLookup::Stale`], untouched.
    #[instrument(skip(self))]
    pub async fn lookup_exact(&self, normalized: &str) -> Result<LedgerLookup, StoreError> {
        self.store.ensure_schema().await?;
        let id = cache_entry_id(normalized);
        let row = sqlx::query(
            "SELECT id, keyword, normalized_keyword, summary, chunk_ids, hit_count, \
             created_at, last_accessed_at, expires_at FROM cache_entries WHERE id = ?",
        )
        .bind(&id)
        .fetch_optional(self.store.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        let Some(row) = row else {
            return Ok(LedgerLookup::Miss);
        };
        let mut entry = decode_entry_row(&row)?;
        let now = Utc::now();
        if entry.is_soft_expired(now) {
            return Ok(LedgerLookup::Stale(entry));
        }

        sqlx::query(
            "UPDATE cache_entries SET hit_count = hit_count + 1, last_accessed_at = ? \
             WHERE id = ?",
        )
        .bind(now)
        .bind(&id)
        .execute(self.store.pool())
        .await
        .map_err(StoreError::from_sqlx)?;
        entry.hit_count += 1;
        entry.last_accessed_at = now;
        Ok(LedgerLookup::Hit(entry))
    }

    /// Read an entry without touching hit counters.
    ///
    /// Used by the semantic tier and by cache warming, where observing an
    /// entry is not a hit.
    pub async fn peek(&self, normalized: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.store.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT id, keyword, normalized_keyword, summary, chunk_ids, hit_count, \
             created_at, last_accessed_at, expires_at FROM cache_entries WHERE id = ?",
        )
        .bind(cache_entry_id(normalized))
        .fetch_optional(self.store.pool())
        .await
        .map_err(StoreError::from_sqlx)?;
        row.as_ref().map(decode_entry_row).transpose()
    }

    /// Create or replace the row for a keyword.
    ///
    /// Always stamps a fresh `expires_at = now + ttl`; the caller's
    /// `created_at` and `hit_count` are written as given so a replacement
    /// run resets them deliberately, not accidentally.
    #[instrument(skip(self, entry), fields(keyword = %entry.normalized_keyword))]
    pub async fn upsert(&self, mut entry: CacheEntry) -> Result<CacheEntry, StoreError> {
        self.store.ensure_schema().await?;
        let ttl = ChronoDuration::from_std(self.config.ttl)
            .unwrap_or_else(|_| ChronoDuration::days(7));
        entry.expires_at = Utc::now() + ttl;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_entries
                (id, keyword, normalized_keyword, summary, chunk_ids, hit_count,
                 created_at, last_accessed_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.keyword)
        .bind(&entry.normalized_keyword)
        .bind(&entry.summary)
        .bind(serde_json::to_string(&entry.chunk_ids)?)
        .bind(entry.hit_count)
        .bind(entry.created_at)
        .bind(entry.last_accessed_at)
        .bind(entry.expires_at)
        .execute(self.store.pool())
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(entry)
    }

    /// Hard retention sweep.
    ///
    /// Deletes entries whose `created_at` is older than the configured
    /// max-age, together with their chunks, regardless of soft-expiry
    /// renewals or hit activity. Entries are removed before their chunks so
    /// no entry ever references a missing chunk.
    #[instrument(skip(self))]
    pub async fn evict_expired_beyond_max_age(&self) -> Result<u64, StoreError> {
        self.store.ensure_schema().await?;
        let max_age = ChronoDuration::from_std(self.config.max_age)
            .unwrap_or_else(|_| ChronoDuration::days(30));
        let cutoff = Utc::now() - max_age;

        let mut tx = self
            .store
            .pool()
            .begin()
            .await
            .map_err(StoreError::from_sqlx)?;
        let keywords: Vec<String> =
            sqlx::query_scalar("SELECT normalized_keyword FROM cache_entries WHERE created_at < ?")
                .bind(cutoff)
                .fetch_all(&mut *tx)
                .await
                .map_err(StoreError::from_sqlx)?;
        if keywords.is_empty() {
            return Ok(0);
        }
        let deleted = sqlx::query("DELETE FROM cache_entries WHERE created_at < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?
            .rows_affected();
        let placeholders = vec!["?"; keywords.len()].join(", ");
        let chunk_delete_sql = format!("DELETE FROM chunks WHERE keyword IN ({placeholders})");
        let mut chunk_delete = sqlx::query(&chunk_delete_sql);
        for keyword in &keywords {
            chunk_delete = chunk_delete.bind(keyword);
        }
        chunk_delete
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(deleted)
    }

    /// All ledger rows, including soft-expired ones, newest first.
    ///
    /// Soft-expired entries are retained until the max-age sweep precisely
    /// so they stay visible here for statistics and audit.
    pub async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        self.store.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT id, keyword, normalized_keyword, summary, chunk_ids, hit_count, \
             created_at, last_accessed_at, expires_at FROM cache_entries \
             ORDER BY created_at DESC",
        )
        .fetch_all(self.store.pool())
        .await
        .map_err(StoreError::from_sqlx)?;
        rows.iter().map(decode_entry_row).collect()
    }

    /// Total ledger rows, including soft-expired ones.
    pub async fn entry_count(&self) -> Result<usize, StoreError> {
        self.store.ensure_schema().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(self.store.pool())
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(count as usize)
    }
}

fn decode_entry_row(row: &SqliteRow) -> Result<CacheEntry, StoreError> {
    let chunk_ids_raw: String = row.try_get("chunk_ids").map_err(StoreError::from_sqlx)?;
    Ok(CacheEntry {
        id: row.try_get("id").map_err(StoreError::from_sqlx)?,
        keyword: row.try_get("keyword").map_err(StoreError::from_sqlx)?,
        normalized_keyword: row
            .try_get("normalized_keyword")
            .map_err(StoreError::from_sqlx)?,
        summary: row.try_get("summary").map_err(StoreError::from_sqlx)?,
        chunk_ids: serde_json::from_str(&chunk_ids_raw)?,
        hit_count: row.try_get("hit_count").map_err(StoreError::from_sqlx)?,
        created_at: row
            .try_get("created_at")
            .map_err(StoreError::from_sqlx)?,
        last_accessed_at: row
            .try_get("last_accessed_at")
            .map_err(StoreError::from_sqlx)?,
        expires_at: row
            .try_get("expires_at")
            .map_err(StoreError::from_sqlx)?,
    })
}
