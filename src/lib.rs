//! ```text
//! Keyword ──► retrieval::RetrievalOrchestrator
//!                  │
//!                  ├─► store::ledger::CacheLedger ──── exact tier (O(1) id)
//!                  │
//!                  ├─► Embedder ──► store::VectorStore.search ── semantic tier
//!                  │
//!                  └─► workflow::ResearchWorkflow ──── fresh research
//!                           │   (8-stage adaptive pipeline)
//!                           ▼
//!                     Findings ──► chunker::TextChunker
//!                                       │
//!                                       ▼
//!                     VectorStore.store_chunks ──► CacheLedger.upsert
//! ```
//!
//! Keyword research results are expensive to produce and cheap to reuse.
//! This crate caches them behind two lookup tiers (an exact ledger keyed by
//! the normalized keyword, and a semantic tier over chunk embeddings) and
//! falls back to an adaptive multi-stage research workflow only when both
//! miss. Fresh findings are chunked, embedded, and persisted so the next
//! request lands in cache.
//!
//! External services (search, content fetch, embedding models) are injected
//! through the traits in [`capabilities`]; nothing here opens a socket.

pub mod capabilities;
pub mod chunker;
pub mod config;
pub mod retrieval;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod testing;
pub mod types;
pub mod workflow;

pub use capabilities::{
    CapabilityError, ContentFetcher, Embedder, ResearchProvider, SearchHit, SearchProvider,
};
pub use chunker::{ChunkSpan, ChunkerConfig, TextChunker};
pub use config::{Config, LedgerConfig, RetrievalConfig, StoreConfig};
pub use retrieval::stats::{RetrievalStatistics, StatsSnapshot};
pub use retrieval::{RetrievalError, RetrievalOrchestrator, WarmReport};
pub use retry::RetryPolicy;
pub use store::ledger::{CacheEntry, CacheLedger, LedgerLookup};
pub use store::{
    BatchInsertReport, ChunkRecord, ScoredChunk, SearchFilters, StoreError, VectorStore,
};
pub use types::{Findings, Keyword, Source, SourceType};
pub use workflow::{
    ProgressUpdate, ResearchDepth, ResearchWorkflow, Strategy, TopicType, WorkflowConfig,
    WorkflowStage,
};
