//! The fallback retrieval chain: exact cache → semantic cache → fresh research.
//!
//! [`RetrievalOrchestrator::retrieve_or_research`] is the crate's main entry
//! point. It resolves a keyword through three tiers in strict order and
//! persists fresh results back through the chunker and vector store so the
//! next request for the same (or a semantically close) keyword is a hit.
//!
//! Two policies shape everything here:
//!
//! * **At most one fresh research run per keyword at any instant.** Research
//!   is assumed expensive, so concurrent callers for the same normalized
//!   keyword are funneled through an in-flight slot: the first caller
//!   resolves, deposits its result, and every waiter receives that result
//!   instead of starting its own run.
//! * **Lookup and caching failures never fail the request.** A broken ledger
//!   or embedder turns a lookup tier into a miss; a failed caching
//!   side-effect is logged and counted while the freshly computed findings
//!   are still returned. Only the research fallback itself failing, with no
//!   cached data to fall back on, propagates to the caller.

pub mod reconstruct;
pub mod stats;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::capabilities::{CapabilityError, Embedder, ResearchProvider};
use crate::chunker::TextChunker;
use crate::config::Config;
use crate::store::ledger::{CacheEntry, CacheLedger, LedgerLookup};
use crate::store::{ScoredChunk, SearchFilters, VectorStore};
use crate::types::{Findings, Keyword};

use stats::{RetrievalOutcome, RetrievalStatistics, StatsSnapshot};

/// The only error a caller of [`retrieve_or_research`] can see.
///
/// Everything recoverable is handled inside the chain; this surfaces only
/// when all three tiers are exhausted.
///
/// [`retrieve_or_research`]: RetrievalOrchestrator::retrieve_or_research
#[derive(Debug, Error, Diagnostic)]
pub enum RetrievalError {
    #[error("research unavailable for '{keyword}': {source}")]
    #[diagnostic(
        code(keywordsmith::retrieval::research_unavailable),
        help("Both cache tiers missed and the research capability failed; retry later.")
    )]
    ResearchUnavailable {
        keyword: String,
        #[source]
        source: CapabilityError,
    },
}

/// Outcome summary of a [`warm_cache`](RetrievalOrchestrator::warm_cache) batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WarmReport {
    /// Keywords freshly researched and cached.
    pub warmed: usize,
    /// Keywords that already had a live cache entry.
    pub skipped: usize,
    /// Keywords whose research failed; the batch continued past them.
    pub failed: usize,
}

/// One in-flight resolution. The resolver holds the lock for the whole
/// resolution and deposits its findings before releasing; waiters that then
/// acquire the lock take the deposit instead of resolving again.
type InFlightSlot = tokio::sync::Mutex<Option<Findings>>;

/// The three-tier retrieval chain.
pub struct RetrievalOrchestrator {
    store: Arc<VectorStore>,
    ledger: CacheLedger,
    embedder: Arc<dyn Embedder>,
    chunker: TextChunker,
    config: Config,
    statistics: Arc<RetrievalStatistics>,
    in_flight: Mutex<FxHashMap<String, Arc<InFlightSlot>>>,
}

impl std::fmt::Debug for RetrievalOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalOrchestrator")
            .field("threshold", &self.config.retrieval.similarity_threshold)
            .finish()
    }
}

impl RetrievalOrchestrator {
    /// Wire the chain around a shared store, an embedder, and an explicitly
    /// owned statistics object.
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: Config,
        statistics: Arc<RetrievalStatistics>,
    ) -> Self {
        let ledger = CacheLedger::new(Arc::clone(&store), config.ledger.clone());
        let chunker = TextChunker::new(config.chunker);
        Self {
            store,
            ledger,
            embedder,
            chunker,
            config,
            statistics,
            in_flight: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn ledger(&self) -> &CacheLedger {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Point-in-time counters with derived hit rate and mean response times.
    pub fn statistics(&self) -> StatsSnapshot {
        self.statistics.snapshot()
    }

    /// Resolve a keyword: exact cache, then semantic cache, then `provider`.
    ///
    /// Concurrent calls for the same normalized keyword share one resolution;
    /// see the module docs for the full policy.
    #[instrument(skip(self, provider), fields(keyword = %keyword.normalized()))]
    pub async fn retrieve_or_research(
        &self,
        keyword: &Keyword,
        provider: &dyn ResearchProvider,
    ) -> Result<Findings, RetrievalError> {
        let started = Instant::now();
        let normalized = keyword.normalized().to_string();

        let slot = self.acquire_slot(&normalized);
        let mut deposit = slot.lock().await;
        if let Some(findings) = deposit.as_ref() {
            // Another caller resolved this keyword while we waited; sharing
            // its already-computed result counts as an exact hit.
            let findings = findings.clone();
            drop(deposit);
            self.statistics
                .record(RetrievalOutcome::Exact, started.elapsed());
            return Ok(findings);
        }

        let result = self.resolve(keyword, provider, started).await;
        if let Ok(findings) = &result {
            *deposit = Some(findings.clone());
        }
        drop(deposit);
        self.release_slot(&normalized, &slot);
        result
    }

    /// Pre-resolve a batch of keywords, skipping ones already live in cache.
    ///
    /// A single keyword's failure never aborts the batch.
    #[instrument(skip(self, keywords, provider), fields(count = keywords.len()))]
    pub async fn warm_cache(
        &self,
        keywords: &[Keyword],
        provider: &dyn ResearchProvider,
    ) -> WarmReport {
        let mut report = WarmReport::default();
        for keyword in keywords {
            match self.ledger.peek(keyword.normalized()).await {
                Ok(Some(entry)) if !entry.is_soft_expired(chrono::Utc::now()) => {
                    report.skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(
                        target: "keywordsmith::retrieval",
                        keyword = keyword.normalized(), %err,
                        "warm-cache peek failed, researching anyway"
                    );
                }
            }
            match self.research_fresh(keyword, provider).await {
                Ok(_) => report.warmed += 1,
                Err(err) => {
                    warn!(
                        target: "keywordsmith::retrieval",
                        keyword = keyword.normalized(), %err, "warm-cache research failed"
                    );
                    self.statistics.record_error();
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn resolve(
        &self,
        keyword: &Keyword,
        provider: &dyn ResearchProvider,
        started: Instant,
    ) -> Result<Findings, RetrievalError> {
        if let Some(findings) = self.try_exact(keyword).await {
            self.statistics
                .record(RetrievalOutcome::Exact, started.elapsed());
            return Ok(findings);
        }
        if let Some(findings) = self.try_semantic(keyword).await {
            self.statistics
                .record(RetrievalOutcome::Semantic, started.elapsed());
            return Ok(findings);
        }
        let findings = self.research_fresh(keyword, provider).await?;
        self.statistics
            .record(RetrievalOutcome::Miss, started.elapsed());
        Ok(findings)
    }

    /// Exact tier: ledger row by deterministic id, rehydrated from chunks.
    ///
    /// Any failure here (ledger unreachable, chunks missing, undecodable
    /// payloads) is logged, counted, and treated as a miss.
    async fn try_exact(&self, keyword: &Keyword) -> Option<Findings> {
        let entry = match self.ledger.lookup_exact(keyword.normalized()).await {
            Ok(LedgerLookup::Hit(entry)) => entry,
            Ok(LedgerLookup::Stale(_)) => {
                debug!(
                    target: "keywordsmith::retrieval",
                    keyword = keyword.normalized(), "entry is soft-expired, treating as miss"
                );
                return None;
            }
            Ok(LedgerLookup::Miss) => return None,
            Err(err) => {
                warn!(
                    target: "keywordsmith::retrieval",
                    keyword = keyword.normalized(), %err, "exact lookup failed, falling through"
                );
                self.statistics.record_error();
                return None;
            }
        };

        let chunks = match self.store.chunks_by_ids(&entry.chunk_ids).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(
                    target: "keywordsmith::retrieval",
                    keyword = keyword.normalized(), %err, "chunk fetch failed, falling through"
                );
                self.statistics.record_error();
                return None;
            }
        };
        match reconstruct::from_exact_entry(&entry, &chunks) {
            Ok(findings) => Some(findings),
            Err(err) => {
                warn!(
                    target: "keywordsmith::retrieval",
                    keyword = keyword.normalized(), %err, "exact reconstruction failed"
                );
                self.statistics.record_error();
                None
            }
        }
    }

    /// Semantic tier: embed the keyword, search stored chunks, pick the best
    /// keyword group with a live ledger entry, and rebuild from it.
    async fn try_semantic(&self, keyword: &Keyword) -> Option<Findings> {
        let embedding = match self.embed_one(keyword.normalized()).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(
                    target: "keywordsmith::retrieval",
                    keyword = keyword.normalized(), %err, "keyword embedding failed, skipping semantic tier"
                );
                self.statistics.record_error();
                return None;
            }
        };

        let retrieval = &self.config.retrieval;
        let scored = match self
            .store
            .search(
                &embedding,
                retrieval.similarity_threshold,
                retrieval.semantic_candidates,
                &SearchFilters::default(),
            )
            .await
        {
            Ok(scored) => scored,
            Err(err) => {
                warn!(
                    target: "keywordsmith::retrieval",
                    keyword = keyword.normalized(), %err, "semantic search failed, skipping tier"
                );
                self.statistics.record_error();
                return None;
            }
        };
        if scored.is_empty() {
            return None;
        }

        for (group_keyword, matched, entry) in self.ranked_groups(scored).await {
            let chunks = match self.store.chunks_by_ids(&entry.chunk_ids).await {
                Ok(chunks) => chunks,
                Err(err) => {
                    debug!(
                        target: "keywordsmith::retrieval",
                        group = %group_keyword, %err, "group chunk fetch failed, trying next"
                    );
                    self.statistics.record_error();
                    continue;
                }
            };
            match reconstruct::from_semantic_group(&entry, &matched, &chunks) {
                Ok(findings) => {
                    debug!(
                        target: "keywordsmith::retrieval",
                        keyword = keyword.normalized(), group = %group_keyword, "semantic hit"
                    );
                    return Some(findings);
                }
                Err(err) => {
                    debug!(
                        target: "keywordsmith::retrieval",
                        group = %group_keyword, %err, "group reconstruction failed, trying next"
                    );
                    self.statistics.record_error();
                }
            }
        }
        None
    }

    /// Group scored chunks by their original keyword and rank the groups.
    ///
    /// Ranking is by aggregate similarity, then latest ledger `created_at`,
    /// then lexicographically smallest keyword, so ties resolve the same way
    /// on every run. Groups without a live (unexpired) ledger entry are
    /// dropped.
    async fn ranked_groups(
        &self,
        scored: Vec<ScoredChunk>,
    ) -> Vec<(String, Vec<ScoredChunk>, CacheEntry)> {
        let mut groups: FxHashMap<String, Vec<ScoredChunk>> = FxHashMap::default();
        for chunk in scored {
            groups
                .entry(chunk.chunk.keyword.clone())
                .or_default()
                .push(chunk);
        }

        let now = chrono::Utc::now();
        let mut ranked = Vec::new();
        for (group_keyword, matched) in groups {
            let entry = match self.ledger.peek(&group_keyword).await {
                Ok(Some(entry)) if !entry.is_soft_expired(now) => entry,
                Ok(_) => continue,
                Err(err) => {
                    debug!(
                        target: "keywordsmith::retrieval",
                        group = %group_keyword, %err, "group ledger peek failed"
                    );
                    continue;
                }
            };
            let aggregate: f32 = matched.iter().map(|c| c.score).sum();
            ranked.push((group_keyword, matched, entry, aggregate));
        }
        ranked.sort_by(|a, b| {
            b.3.total_cmp(&a.3)
                .then_with(|| b.2.created_at.cmp(&a.2.created_at))
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
            .into_iter()
            .map(|(keyword, matched, entry, _)| (keyword, matched, entry))
            .collect()
    }

    /// Miss tier: run the research capability, then cache the result.
    ///
    /// The caching side-effect is best-effort; its failures are absorbed.
    async fn research_fresh(
        &self,
        keyword: &Keyword,
        provider: &dyn ResearchProvider,
    ) -> Result<Findings, RetrievalError> {
        let timeout = self.config.retrieval.research_timeout;
        let findings = match tokio::time::timeout(timeout, provider.research(keyword)).await {
            Ok(Ok(findings)) => findings,
            Ok(Err(source)) => {
                return Err(RetrievalError::ResearchUnavailable {
                    keyword: keyword.normalized().to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(RetrievalError::ResearchUnavailable {
                    keyword: keyword.normalized().to_string(),
                    source: CapabilityError::Timeout { elapsed: timeout },
                });
            }
        };
        self.persist(keyword, &findings).await;
        Ok(findings)
    }

    /// Chunk, embed, and store fresh findings, then write the ledger row.
    ///
    /// Chunks are written before the entry that references them, so the
    /// entry never points at a chunk id that does not exist. Embedding
    /// failures degrade to storing the affected chunks without vectors.
    async fn persist(&self, keyword: &Keyword, findings: &Findings) {
        let mut chunks = reconstruct::findings_to_chunks(keyword, findings, &self.chunker);
        if chunks.is_empty() {
            debug!(
                target: "keywordsmith::retrieval",
                keyword = keyword.normalized(), "nothing to cache, findings had no text"
            );
            return;
        }

        let batch_size = self.config.retrieval.embedding_batch_size.max(1);
        let batch_results = futures_util::future::join_all(chunks.chunks(batch_size).map(
            |batch| async move {
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                self.embed_batch(&texts).await
            },
        ))
        .await;
        for (batch, result) in chunks.chunks_mut(batch_size).zip(batch_results) {
            match result {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for (chunk, vector) in batch.iter_mut().zip(vectors) {
                        chunk.embedding = Some(vector);
                    }
                }
                Ok(vectors) => {
                    warn!(
                        target: "keywordsmith::retrieval",
                        expected = batch.len(), got = vectors.len(),
                        "embedder returned a short batch, storing chunks unembedded"
                    );
                    self.statistics.record_error();
                }
                Err(err) => {
                    warn!(
                        target: "keywordsmith::retrieval",
                        keyword = keyword.normalized(), %err,
                        "embedding failed, storing chunks unembedded"
                    );
                    self.statistics.record_error();
                }
            }
        }

        let report = match self.store.store_chunks(chunks).await {
            Ok(report) => report,
            Err(err) => {
                warn!(
                    target: "keywordsmith::retrieval",
                    keyword = keyword.normalized(), %err, "chunk storage failed, skipping cache entry"
                );
                self.statistics.record_error();
                return;
            }
        };
        if !report.failed.is_empty() {
            warn!(
                target: "keywordsmith::retrieval",
                keyword = keyword.normalized(),
                failed = report.failed.len(),
                "some chunks failed to persist"
            );
            self.statistics.record_error();
        }
        if report.stored.is_empty() {
            return;
        }

        let entry = CacheEntry::new(keyword, findings.summary.clone(), report.stored);
        if let Err(err) = self.ledger.upsert(entry).await {
            warn!(
                target: "keywordsmith::retrieval",
                keyword = keyword.normalized(), %err, "ledger upsert failed"
            );
            self.statistics.record_error();
        }
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| CapabilityError::Unavailable("embedder returned no vector".to_string()))
    }

    /// Embed with the configured retry policy, bounded by the lookup timeout.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        let embedder = self.embedder.as_ref();
        let timeout = self.config.retrieval.lookup_timeout;
        let attempt = move || async move {
            match tokio::time::timeout(timeout, embedder.embed(texts)).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout { elapsed: timeout }),
            }
        };
        self.config
            .retrieval
            .embedding_retry
            .run("embed", attempt)
            .await
    }

    fn acquire_slot(&self, normalized: &str) -> Arc<InFlightSlot> {
        let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(normalized.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None))),
        )
    }

    /// Drop the in-flight marker once its resolution is over, whether it
    /// succeeded or not, so a later call can try again. Waiters holding the
    /// slot still read the deposit through their own `Arc`.
    fn release_slot(&self, normalized: &str, slot: &Arc<InFlightSlot>) {
        let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(normalized).is_some_and(|held| Arc::ptr_eq(held, slot)) {
            map.remove(normalized);
        }
    }
}
