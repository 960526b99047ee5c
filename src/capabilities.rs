//! External capabilities consumed by the cache and workflow.
//!
//! The core never talks to a network or an embedding model directly. Every
//! external dependency is expressed as an injected trait so the retrieval
//! pipeline and workflow engine can be exercised with deterministic fakes:
//!
//! - [`Embedder`]: text to fixed-dimension vectors
//! - [`SearchProvider`]: broad keyword search (workflow Discovery)
//! - [`ContentFetcher`]: full-content fetch (workflow Extraction/Crawling)
//! - [`ResearchProvider`]: the whole fresh-research fallback, as one call
//!
//! Failures from any capability are described by [`CapabilityError`], which
//! carries the transient/permanent distinction the retry layer keys off.

use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Findings, Keyword};

/// Failure of an injected external capability.
///
/// `Unavailable`, `RateLimited`, and `Timeout` are transient and eligible for
/// retry with backoff; `Rejected` is permanent (malformed input, auth
/// failure) and must not be retried.
#[derive(Debug, Error, Diagnostic)]
pub enum CapabilityError {
    /// The capability is temporarily unreachable or overloaded.
    #[error("capability unavailable: {0}")]
    #[diagnostic(
        code(keywordsmith::capability::unavailable),
        help("Transient; retry with backoff.")
    )]
    Unavailable(String),

    /// The capability refused the call due to rate limiting.
    #[error("rate limited (retry after {retry_after:?})")]
    #[diagnostic(code(keywordsmith::capability::rate_limited))]
    RateLimited { retry_after: Option<Duration> },

    /// The call did not complete within the caller-supplied bound.
    #[error("timed out after {elapsed:?}")]
    #[diagnostic(code(keywordsmith::capability::timeout))]
    Timeout { elapsed: Duration },

    /// The capability rejected the request outright.
    #[error("request rejected: {0}")]
    #[diagnostic(
        code(keywordsmith::capability::rejected),
        help("Permanent; check the request, do not retry.")
    )]
    Rejected(String),
}

impl CapabilityError {
    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CapabilityError::Rejected(_))
    }
}

/// Produces fixed-dimension embedding vectors for text.
///
/// Implementations are expected to return vectors pre-normalized to unit
/// length; the vector store rescales any whose norm has drifted.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimensionality of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError>;
}

/// A single raw result from the search capability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Broad keyword search used by the workflow's Discovery stage.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, CapabilityError>;
}

/// Full-content fetch used by the Extraction and Crawling stages.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, CapabilityError>;
}

/// The fresh-research fallback as a single injected call.
///
/// The retrieval orchestrator invokes this only after both cache tiers miss.
/// [`crate::workflow::ResearchWorkflow`] implements it, but tests routinely
/// substitute canned providers.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn research(&self, keyword: &Keyword) -> Result<Findings, CapabilityError>;
}
