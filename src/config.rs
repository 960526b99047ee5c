//! Configuration surface for the cache, store, and retrieval pipeline.
//!
//! Every knob has a default that matches the documented behavior, so
//! `Config::default()` is a working configuration for an on-disk SQLite
//! database. [`Config::from_env`] layers environment overrides on top
//! (loading a `.env` file first when present), which is how embedding
//! applications are expected to configure the core.
//!
//! Recognized environment variables:
//!
//! | Variable | Default |
//! |---|---|
//! | `KEYWORDSMITH_DB_URL` (or `DATABASE_URL`) | `sqlite://keywordsmith.db?mode=rwc` |
//! | `KEYWORDSMITH_DB_POOL_SIZE` | `10` |
//! | `KEYWORDSMITH_DB_ACQUIRE_TIMEOUT_SECS` | `60` |
//! | `KEYWORDSMITH_SIMILARITY_THRESHOLD` | `0.8` |
//! | `KEYWORDSMITH_CACHE_TTL_DAYS` | `7` |
//! | `KEYWORDSMITH_CACHE_MAX_AGE_DAYS` | `30` |
//! | `KEYWORDSMITH_CHUNK_SIZE` | `1000` |
//! | `KEYWORDSMITH_CHUNK_OVERLAP` | `200` |
//! | `KEYWORDSMITH_EMBEDDING_BATCH_SIZE` | `16` |
//! | `KEYWORDSMITH_EMBEDDING_MAX_RETRIES` | `3` |
//! | `KEYWORDSMITH_EMBEDDING_DIMENSION` | `1536` |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chunker::ChunkerConfig;
use crate::retry::RetryPolicy;

const DAY_SECS: u64 = 24 * 60 * 60;

/// Vector database connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLx connection URL, e.g. `sqlite://keywordsmith.db?mode=rwc`.
    pub connection_string: String,
    /// Maximum connections held by the pool.
    pub pool_size: u32,
    /// How long an acquire may wait before surfacing pool exhaustion.
    pub acquire_timeout: Duration,
    /// Expected embedding dimensionality; vectors of other lengths are
    /// rejected at store time.
    pub embedding_dimension: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_string: "sqlite://keywordsmith.db?mode=rwc".to_string(),
            pool_size: 10,
            acquire_timeout: Duration::from_secs(60),
            embedding_dimension: 1536,
        }
    }
}

/// Cache-ledger expiry settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Soft expiry: entries older than this are treated as misses but kept.
    pub ttl: Duration,
    /// Hard ceiling: entries created before this are physically deleted.
    pub max_age: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7 * DAY_SECS),
            max_age: Duration::from_secs(30 * DAY_SECS),
        }
    }
}

/// Retrieval-orchestrator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum similarity score for a semantic cache hit, in [0, 1].
    pub similarity_threshold: f32,
    /// How many candidate chunks the semantic tier pulls before grouping.
    pub semantic_candidates: usize,
    /// Texts per embedding-capability call.
    pub embedding_batch_size: usize,
    /// Retry policy applied to embedding calls.
    pub embedding_retry: RetryPolicy,
    /// Bound on each cache-lookup external call (embed, search).
    pub lookup_timeout: Duration,
    /// Bound on the fresh-research fallback.
    pub research_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            semantic_candidates: 24,
            embedding_batch_size: 16,
            embedding_retry: RetryPolicy::default(),
            lookup_timeout: Duration::from_secs(30),
            research_timeout: Duration::from_secs(300),
        }
    }
}

/// Aggregate configuration for the whole core.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    pub retrieval: RetrievalConfig,
    pub chunker: ChunkerConfig,
}

impl Config {
    /// Defaults overlaid with environment variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    /// Unparseable values are logged and fall back to the default rather
    /// than failing startup.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        let connection_string = std::env::var("KEYWORDSMITH_DB_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or(defaults.store.connection_string);

        let similarity_threshold: f32 = env_parse(
            "KEYWORDSMITH_SIMILARITY_THRESHOLD",
            defaults.retrieval.similarity_threshold,
        );
        let embedding_max_retries: u32 = env_parse(
            "KEYWORDSMITH_EMBEDDING_MAX_RETRIES",
            defaults.retrieval.embedding_retry.max_attempts,
        );

        Config {
            store: StoreConfig {
                connection_string,
                pool_size: env_parse("KEYWORDSMITH_DB_POOL_SIZE", defaults.store.pool_size),
                acquire_timeout: Duration::from_secs(env_parse(
                    "KEYWORDSMITH_DB_ACQUIRE_TIMEOUT_SECS",
                    defaults.store.acquire_timeout.as_secs(),
                )),
                embedding_dimension: env_parse(
                    "KEYWORDSMITH_EMBEDDING_DIMENSION",
                    defaults.store.embedding_dimension,
                ),
            },
            ledger: LedgerConfig {
                ttl: Duration::from_secs(
                    env_parse("KEYWORDSMITH_CACHE_TTL_DAYS", 7u64) * DAY_SECS,
                ),
                max_age: Duration::from_secs(
                    env_parse("KEYWORDSMITH_CACHE_MAX_AGE_DAYS", 30u64) * DAY_SECS,
                ),
            },
            retrieval: RetrievalConfig {
                similarity_threshold: similarity_threshold.clamp(0.0, 1.0),
                embedding_batch_size: env_parse(
                    "KEYWORDSMITH_EMBEDDING_BATCH_SIZE",
                    defaults.retrieval.embedding_batch_size,
                ),
                embedding_retry: RetryPolicy {
                    max_attempts: embedding_max_retries.max(1),
                    ..defaults.retrieval.embedding_retry
                },
                ..defaults.retrieval
            },
            chunker: ChunkerConfig {
                target_size: env_parse("KEYWORDSMITH_CHUNK_SIZE", defaults.chunker.target_size),
                overlap: env_parse("KEYWORDSMITH_CHUNK_OVERLAP", defaults.chunker.overlap),
            },
        }
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(
                target: "keywordsmith::config",
                %key, value = %raw, "unparseable config value, using default"
            );
            default
        }),
        Err(_) => default,
    }
}
