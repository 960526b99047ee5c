//! Shared fixtures for the integration tests: canned capability
//! implementations with invocation counters, and helpers that wire an
//! orchestrator over a throwaway on-disk SQLite database.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use keywordsmith::capabilities::{
    CapabilityError, ContentFetcher, ResearchProvider, SearchHit, SearchProvider,
};
use keywordsmith::RetryPolicy;
use keywordsmith::config::{Config, RetrievalConfig, StoreConfig};
use keywordsmith::retrieval::stats::RetrievalStatistics;
use keywordsmith::testing::MockEmbedder;
use keywordsmith::types::{Findings, Keyword, Source, SourceType};
use keywordsmith::{Embedder, RetrievalOrchestrator, VectorStore};

/// Research provider returning a canned result, counting invocations.
pub struct CannedResearch {
    findings: Findings,
    pub calls: AtomicUsize,
    /// Optional artificial latency, to widen race windows in dedup tests.
    pub delay: Duration,
}

impl CannedResearch {
    pub fn new(findings: Findings) -> Self {
        Self {
            findings,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchProvider for CannedResearch {
    async fn research(&self, _keyword: &Keyword) -> Result<Findings, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.findings.clone())
    }
}

/// Research provider that always fails; proves the cache answered instead.
pub struct FailingResearch {
    pub calls: AtomicUsize,
}

impl FailingResearch {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchProvider for FailingResearch {
    async fn research(&self, _keyword: &Keyword) -> Result<Findings, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CapabilityError::Unavailable(
            "research should not have been invoked".to_string(),
        ))
    }
}

/// Search provider returning the same hits on every call.
pub struct StaticSearch {
    hits: Vec<SearchHit>,
    pub calls: AtomicUsize,
}

impl StaticSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchHit>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}

/// Search provider that is always down.
pub struct FailingSearch;

#[async_trait]
impl SearchProvider for FailingSearch {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>, CapabilityError> {
        Err(CapabilityError::Unavailable("search is down".to_string()))
    }
}

/// Fetcher returning the same body for every URL.
pub struct StaticFetcher {
    content: String,
    pub calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.content.clone())
    }
}

/// Fetcher that always fails with a retryable error.
pub struct FailingFetcher {
    pub calls: AtomicUsize,
}

impl FailingFetcher {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for FailingFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CapabilityError::Unavailable("fetch refused".to_string()))
    }
}

/// Embedder that always fails; the cache path must degrade, not break.
pub struct DownEmbedder {
    dimension: usize,
}

impl DownEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for DownEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        Err(CapabilityError::Unavailable("embedder is down".to_string()))
    }
}

/// A config pointed at a fresh on-disk database inside `dir`.
pub fn test_config(dir: &TempDir, dimension: usize) -> Config {
    let db_path = dir.path().join("keywordsmith-test.db");
    Config {
        store: StoreConfig {
            connection_string: format!("sqlite://{}?mode=rwc", db_path.display()),
            pool_size: 4,
            acquire_timeout: Duration::from_secs(5),
            embedding_dimension: dimension,
        },
        retrieval: RetrievalConfig {
            embedding_retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..RetrievalConfig::default()
        },
        ..Config::default()
    }
}

/// Orchestrator over a fresh database with the given embedder.
pub fn orchestrator_with(
    config: Config,
    embedder: Arc<dyn Embedder>,
) -> Arc<RetrievalOrchestrator> {
    keywordsmith::telemetry::init();
    let store = Arc::new(VectorStore::connect_lazy(config.store.clone()).expect("lazy pool"));
    Arc::new(RetrievalOrchestrator::new(
        store,
        embedder,
        config,
        Arc::new(RetrievalStatistics::new()),
    ))
}

/// Orchestrator with a hash-seeded [`MockEmbedder`] of the given dimension.
pub fn orchestrator(dir: &TempDir, dimension: usize) -> Arc<RetrievalOrchestrator> {
    orchestrator_with(
        test_config(dir, dimension),
        Arc::new(MockEmbedder::new(dimension)),
    )
}

/// Findings with `source_count` credible sources and the given summary.
pub fn sample_findings(keyword: &str, summary: &str, source_count: usize) -> Findings {
    let sources: Vec<Source> = (0..source_count)
        .map(|i| Source {
            title: format!("Source {i} on {keyword}"),
            url: format!("https://research{i}.gov/{i}"),
            domain: format!("research{i}.gov"),
            credibility_score: 0.9,
            excerpt: format!(
                "Detailed material number {i} about {keyword}. It spans multiple sentences \
                 so the chunker has something to cut. A cohort of 120 participants was \
                 followed for 12 weeks."
            ),
            source_type: SourceType::Government,
            authors: vec![],
            publication_date: None,
        })
        .collect();
    Findings {
        keyword: keyword.to_string(),
        summary: summary.to_string(),
        sources,
        main_findings: vec![format!("Key finding about {keyword}.")],
        statistics: vec!["120 participants over 12 weeks".to_string()],
        gaps: vec![],
        total_sources_analyzed: source_count + 2,
        search_query_used: format!("{keyword} research"),
        timestamp: Utc::now(),
    }
}
