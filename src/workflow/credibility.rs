//! Deterministic source credibility scoring.
//!
//! The score is a pure function of a source's domain and the text around it:
//! same inputs, same score, on every run and every machine. Nothing here is
//! user-editable after a [`Source`](crate::types::Source) is created.

use crate::types::SourceType;

/// Baseline for a domain nobody has vouched for.
const BASE_SCORE: f32 = 0.4;

/// Content markers suggesting peer review or formal indexing.
const SCHOLARLY_MARKERS: &[&str] = &[
    "doi.org",
    "peer-reviewed",
    "peer reviewed",
    "journal",
    "pubmed",
    "randomized controlled",
    "meta-analysis",
    "systematic review",
    "clinical trial",
];

/// Markers that drag a source toward the promotional end.
const PROMOTIONAL_MARKERS: &[&str] = &[
    "sponsored",
    "affiliate",
    "buy now",
    "limited offer",
    "discount code",
];

/// Score a source's credibility in [0, 1].
///
/// Domain suffix sets the baseline (government and education rank highest),
/// scholarly content markers raise it, promotional markers lower it.
#[must_use]
pub fn score(domain: &str, content: &str) -> f32 {
    let domain = domain.to_lowercase();
    let content = content.to_lowercase();

    let mut score = domain_base(&domain);

    let scholarly = SCHOLARLY_MARKERS
        .iter()
        .filter(|m| content.contains(*m))
        .count();
    score += 0.05 * scholarly.min(3) as f32;

    let promotional = PROMOTIONAL_MARKERS
        .iter()
        .filter(|m| content.contains(*m))
        .count();
    score -= 0.1 * promotional.min(3) as f32;

    score.clamp(0.0, 1.0)
}

/// Classify a source by its domain and content markers.
#[must_use]
pub fn classify(domain: &str, content: &str) -> SourceType {
    let domain = domain.to_lowercase();
    let content = content.to_lowercase();

    if domain.ends_with(".gov") || domain.contains(".gov.") {
        SourceType::Government
    } else if domain.ends_with(".edu")
        || is_scholarly_domain(&domain)
        || SCHOLARLY_MARKERS.iter().any(|m| content.contains(m))
    {
        SourceType::Academic
    } else if is_news_domain(&domain) {
        SourceType::News
    } else if domain.starts_with("docs.")
        || domain.contains("documentation")
        || content.contains("api reference")
    {
        SourceType::Documentation
    } else if domain.contains("blog") || domain.contains("medium.com") {
        SourceType::Blog
    } else {
        SourceType::General
    }
}

fn domain_base(domain: &str) -> f32 {
    if domain.ends_with(".gov") || domain.contains(".gov.") {
        0.9
    } else if domain.ends_with(".edu") || domain.contains(".ac.") {
        0.85
    } else if is_scholarly_domain(domain) {
        0.8
    } else if domain.ends_with(".org") {
        0.65
    } else if is_news_domain(domain) {
        0.6
    } else if domain.ends_with(".io") || domain.ends_with(".dev") {
        0.5
    } else {
        BASE_SCORE
    }
}

fn is_scholarly_domain(domain: &str) -> bool {
    const SCHOLARLY_DOMAINS: &[&str] = &[
        "nature.com",
        "sciencedirect.com",
        "springer.com",
        "ncbi.nlm.nih.gov",
        "pubmed.ncbi.nlm.nih.gov",
        "arxiv.org",
        "jamanetwork.com",
        "thelancet.com",
        "diabetesjournals.org",
    ];
    SCHOLARLY_DOMAINS.iter().any(|d| domain.ends_with(d)) || domain.contains("journal")
}

fn is_news_domain(domain: &str) -> bool {
    const NEWS_DOMAINS: &[&str] = &[
        "reuters.com",
        "apnews.com",
        "bbc.co.uk",
        "bbc.com",
        "nytimes.com",
        "theguardian.com",
        "bloomberg.com",
        "ft.com",
    ];
    NEWS_DOMAINS.iter().any(|d| domain.ends_with(d)) || domain.contains("news")
}
