//! Core domain types for the keywordsmith research cache.
//!
//! This module defines the vocabulary shared by every other module: keywords
//! and their normalized cache keys, research sources, and the [`Findings`]
//! produced by a research run.
//!
//! # Key Types
//!
//! - [`Keyword`]: a raw research topic plus its normalized cache-key form
//! - [`Source`]: one analyzed source with a deterministic credibility score
//! - [`Findings`]: the immutable result of a single research run
//!
//! # Examples
//!
//! ```rust
//! use keywordsmith::types::Keyword;
//!
//! let kw = Keyword::new("  Blood   Sugar Monitoring ");
//! assert_eq!(kw.normalized(), "blood sugar monitoring");
//! assert_eq!(kw.raw(), "  Blood   Sugar Monitoring ");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

/// Normalize a keyword into its canonical cache-key form.
///
/// Lowercases, trims, and collapses internal whitespace runs to a single
/// space. Total (never fails) and idempotent: `normalize(normalize(k))`
/// equals `normalize(k)` for every input.
pub fn normalize(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic ledger row id for a normalized keyword.
///
/// The id is stable across processes and runs, so the same keyword always
/// maps to the same ledger row.
pub fn cache_entry_id(normalized: &str) -> String {
    let mut hasher = FxHasher::default();
    normalized.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// A user-supplied research topic.
///
/// The raw form is preserved for display; the normalized form is the cache
/// key used by the ledger and the vector store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    raw: String,
    normalized: String,
}

impl Keyword {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let normalized = normalize(&raw);
        Self { raw, normalized }
    }

    /// The keyword exactly as the caller supplied it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The normalized cache-key form.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Deterministic ledger row id for this keyword.
    pub fn entry_id(&self) -> String {
        cache_entry_id(&self.normalized)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl From<&str> for Keyword {
    fn from(s: &str) -> Self {
        Keyword::new(s)
    }
}

/// Category of a research source.
///
/// Persisted in chunk metadata in encoded string form so stored chunks can be
/// filtered by source type without deserializing the whole record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Academic,
    Government,
    News,
    Documentation,
    Blog,
    General,
}

impl SourceType {
    /// Encoded string form used in persisted metadata and SQL filters.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Academic => "academic",
            SourceType::Government => "government",
            SourceType::News => "news",
            SourceType::Documentation => "documentation",
            SourceType::Blog => "blog",
            SourceType::General => "general",
        }
    }

    /// Decode a persisted string form, falling back to `General` for
    /// unrecognized values.
    pub fn decode(s: &str) -> Self {
        match s {
            "academic" => SourceType::Academic,
            "government" => SourceType::Government,
            "news" => SourceType::News,
            "documentation" => SourceType::Documentation,
            "blog" => SourceType::Blog,
            _ => SourceType::General,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One analyzed source contributing to a set of findings.
///
/// `credibility_score` is a deterministic function of the domain and content
/// markers (see `workflow::credibility`) and is never edited after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub domain: String,
    pub credibility_score: f32,
    pub excerpt: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub publication_date: Option<DateTime<Utc>>,
}

impl Source {
    /// Extract the registrable host from a URL-ish string.
    ///
    /// Falls back to the input unchanged when no scheme/path structure is
    /// present, so the function is total.
    pub fn domain_of(url: &str) -> String {
        let stripped = url
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let host = stripped.split('/').next().unwrap_or(stripped);
        host.split(':')
            .next()
            .unwrap_or(host)
            .trim_start_matches("www.")
            .to_lowercase()
    }
}

/// The immutable result of one research run for one keyword.
///
/// Invariant: `total_sources_analyzed >= sources.len()`; the run may have
/// looked at more sources than survived credibility filtering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Findings {
    pub keyword: String,
    pub summary: String,
    pub sources: Vec<Source>,
    pub main_findings: Vec<String>,
    pub statistics: Vec<String>,
    pub gaps: Vec<String>,
    pub total_sources_analyzed: usize,
    pub search_query_used: String,
    pub timestamp: DateTime<Utc>,
}

impl Findings {
    /// Checks the source-count invariant and summary presence.
    ///
    /// Used by workflow Validation and by per-tier reconstruction to fail
    /// loudly rather than hand back inconsistent results.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.summary.trim().is_empty() && self.total_sources_analyzed >= self.sources.len()
    }
}
