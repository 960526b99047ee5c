//! Decomposing findings into chunks and rebuilding them from storage.
//!
//! Every persisted chunk carries a tagged [`ChunkPayload`] in its metadata
//! column: either the findings envelope (summary document) or one source's
//! record (excerpt document). Reconstruction reads those payloads back and
//! fails loudly on a missing or malformed field; a cached result that can
//! no longer be decoded is an error, never a silently defaulted value.
//!
//! There is one reconstruction entry point per cache tier
//! ([`from_exact_entry`], [`from_semantic_group`]) so the provenance of a
//! rebuilt result is explicit at the call site.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::chunker::TextChunker;
use crate::store::ledger::CacheEntry;
use crate::store::{ChunkRecord, ScoredChunk};
use crate::types::{Findings, Keyword, Source};

/// Source id shared by all chunks of the summary document.
const SUMMARY_SOURCE_ID: &str = "summary";

#[derive(Debug, Error, Diagnostic)]
pub enum ReconstructError {
    #[error("no chunks available to reconstruct '{keyword}'")]
    #[diagnostic(
        code(keywordsmith::reconstruct::empty),
        help("The cache entry references chunks that no longer exist; treat as a miss.")
    )]
    EmptyChunkSet { keyword: String },

    #[error("no findings envelope among {chunk_count} chunks for '{keyword}'")]
    #[diagnostic(
        code(keywordsmith::reconstruct::missing_envelope),
        help("Summary chunks were lost or were written by an incompatible version.")
    )]
    MissingEnvelope { keyword: String, chunk_count: usize },

    #[error("undecodable chunk metadata: {0}")]
    #[diagnostic(code(keywordsmith::reconstruct::metadata))]
    Metadata(#[from] serde_json::Error),

    #[error("inconsistent reconstruction for '{keyword}': {sources} sources but {analyzed} analyzed")]
    #[diagnostic(code(keywordsmith::reconstruct::inconsistent))]
    Inconsistent {
        keyword: String,
        sources: usize,
        analyzed: usize,
    },
}

/// Tagged metadata stored with every chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkPayload {
    /// The findings envelope, attached to every chunk of the summary
    /// document. Reconstruction reads the first one it finds.
    Summary {
        keyword: String,
        main_findings: Vec<String>,
        statistics: Vec<String>,
        gaps: Vec<String>,
        total_sources_analyzed: usize,
        search_query_used: String,
        timestamp: DateTime<Utc>,
    },
    /// One source's record, attached to every chunk cut from its excerpt.
    SourceExcerpt { source: Source },
}

/// Decompose findings into storable chunks (embeddings not yet attached).
///
/// The summary, main findings, statistics, and gaps form one "summary
/// document"; each source's excerpt forms its own document. Chunk ids are
/// fresh; chunk indexes are dense and zero-based per document.
pub fn findings_to_chunks(
    keyword: &Keyword,
    findings: &Findings,
    chunker: &TextChunker,
) -> Vec<ChunkRecord> {
    let envelope = ChunkPayload::Summary {
        keyword: findings.keyword.clone(),
        main_findings: findings.main_findings.clone(),
        statistics: findings.statistics.clone(),
        gaps: findings.gaps.clone(),
        total_sources_analyzed: findings.total_sources_analyzed,
        search_query_used: findings.search_query_used.clone(),
        timestamp: findings.timestamp,
    };
    let envelope_json = serde_json::to_value(&envelope)
        .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));

    let mut records = Vec::new();
    let summary_text = summary_document_text(findings);
    for span in chunker.chunk(&summary_text) {
        records.push(
            ChunkRecord::new(
                keyword.normalized(),
                SUMMARY_SOURCE_ID,
                span.index,
                span.text,
            )
            .with_metadata(envelope_json.clone()),
        );
    }

    for source in &findings.sources {
        let source_id = Uuid::new_v4().to_string();
        let payload = ChunkPayload::SourceExcerpt {
            source: source.clone(),
        };
        let Ok(payload_json) = serde_json::to_value(&payload) else {
            continue;
        };
        for span in chunker.chunk(&source.excerpt) {
            records.push(
                ChunkRecord::new(keyword.normalized(), &source_id, span.index, span.text)
                    .with_metadata(payload_json.clone()),
            );
        }
    }
    records
}

/// Rebuild findings from an exact-tier cache hit.
///
/// `chunks` are the rows fetched for the entry's chunk ids; the summary
/// itself comes from the ledger row.
pub fn from_exact_entry(
    entry: &CacheEntry,
    chunks: &[ChunkRecord],
) -> Result<Findings, ReconstructError> {
    rebuild(&entry.normalized_keyword, &entry.summary, chunks)
}

/// Rebuild findings from the winning semantic-tier keyword group.
///
/// The scored chunks identify the group; the full chunk set for the matched
/// entry is what gets rebuilt, so findings are complete even when the
/// search returned only a few of the entry's chunks.
pub fn from_semantic_group(
    entry: &CacheEntry,
    matched: &[ScoredChunk],
    chunks: &[ChunkRecord],
) -> Result<Findings, ReconstructError> {
    if matched.is_empty() {
        return Err(ReconstructError::EmptyChunkSet {
            keyword: entry.normalized_keyword.clone(),
        });
    }
    rebuild(&entry.normalized_keyword, &entry.summary, chunks)
}

fn rebuild(
    normalized: &str,
    summary: &str,
    chunks: &[ChunkRecord],
) -> Result<Findings, ReconstructError> {
    if chunks.is_empty() {
        return Err(ReconstructError::EmptyChunkSet {
            keyword: normalized.to_string(),
        });
    }

    let mut envelope = None;
    let mut sources: Vec<Source> = Vec::new();
    let mut seen_sources = Vec::new();
    for chunk in chunks {
        let payload: ChunkPayload = serde_json::from_value(chunk.metadata.clone())?;
        match payload {
            ChunkPayload::Summary { .. } if envelope.is_none() => envelope = Some(payload),
            ChunkPayload::Summary { .. } => {}
            ChunkPayload::SourceExcerpt { source } => {
                if !seen_sources.contains(&chunk.source_id) {
                    seen_sources.push(chunk.source_id.clone());
                    sources.push(source);
                }
            }
        }
    }

    let Some(ChunkPayload::Summary {
        keyword,
        main_findings,
        statistics,
        gaps,
        total_sources_analyzed,
        search_query_used,
        timestamp,
    }) = envelope
    else {
        return Err(ReconstructError::MissingEnvelope {
            keyword: normalized.to_string(),
            chunk_count: chunks.len(),
        });
    };

    if total_sources_analyzed < sources.len() {
        return Err(ReconstructError::Inconsistent {
            keyword: normalized.to_string(),
            sources: sources.len(),
            analyzed: total_sources_analyzed,
        });
    }

    Ok(Findings {
        keyword,
        summary: summary.to_string(),
        sources,
        main_findings,
        statistics,
        gaps,
        total_sources_analyzed,
        search_query_used,
        timestamp,
    })
}

fn summary_document_text(findings: &Findings) -> String {
    let mut text = findings.summary.clone();
    for finding in &findings.main_findings {
        text.push_str("\n\n");
        text.push_str(finding);
    }
    for stat in &findings.statistics {
        text.push_str("\n\n");
        text.push_str(stat);
    }
    for gap in &findings.gaps {
        text.push_str("\n\n");
        text.push_str(gap);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceType;

    fn sample_findings() -> Findings {
        Findings {
            keyword: "Blood Sugar Monitoring".to_string(),
            summary: "Continuous monitoring improves glycemic control.".to_string(),
            sources: vec![
                Source {
                    title: "CGM accuracy study".to_string(),
                    url: "https://www.nih.gov/cgm".to_string(),
                    domain: "nih.gov".to_string(),
                    credibility_score: 0.9,
                    excerpt: "The study followed 120 participants over 12 weeks. Accuracy \
                              improved markedly with newer sensors."
                        .to_string(),
                    source_type: SourceType::Government,
                    authors: vec!["Rivera, L.".to_string()],
                    publication_date: None,
                },
                Source {
                    title: "Glucose trends overview".to_string(),
                    url: "https://diabetesjournals.org/trends".to_string(),
                    domain: "diabetesjournals.org".to_string(),
                    credibility_score: 0.8,
                    excerpt: "Trend arrows help patients anticipate excursions.".to_string(),
                    source_type: SourceType::Academic,
                    authors: vec![],
                    publication_date: None,
                },
            ],
            main_findings: vec!["Sensors are accurate within 9% MARD.".to_string()],
            statistics: vec!["120 participants, 12 weeks".to_string()],
            gaps: vec!["Little data on type 2 outcomes.".to_string()],
            total_sources_analyzed: 5,
            search_query_used: "blood sugar monitoring research".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn decompose_then_rebuild_round_trips() {
        let keyword = Keyword::new("Blood Sugar Monitoring");
        let findings = sample_findings();
        let chunker = TextChunker::default();

        let chunks = findings_to_chunks(&keyword, &findings, &chunker);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().any(|c| c.source_id == SUMMARY_SOURCE_ID));
        assert!(chunks.iter().all(|c| c.keyword == "blood sugar monitoring"));

        let entry = CacheEntry::new(
            &keyword,
            findings.summary.clone(),
            chunks.iter().map(|c| c.id.clone()).collect(),
        );
        let rebuilt = from_exact_entry(&entry, &chunks).unwrap();
        assert_eq!(rebuilt.summary, findings.summary);
        assert_eq!(rebuilt.sources.len(), 2);
        assert_eq!(rebuilt.main_findings, findings.main_findings);
        assert_eq!(rebuilt.total_sources_analyzed, 5);
        assert_eq!(rebuilt.search_query_used, findings.search_query_used);
    }

    #[test]
    fn rebuild_fails_loudly_without_envelope() {
        let keyword = Keyword::new("keto");
        let findings = sample_findings();
        let chunker = TextChunker::default();
        let chunks: Vec<_> = findings_to_chunks(&keyword, &findings, &chunker)
            .into_iter()
            .filter(|c| c.source_id != SUMMARY_SOURCE_ID)
            .collect();
        let entry = CacheEntry::new(&keyword, "s", vec![]);
        let err = from_exact_entry(&entry, &chunks).unwrap_err();
        assert!(matches!(err, ReconstructError::MissingEnvelope { .. }));
    }

    #[test]
    fn rebuild_fails_on_empty_chunk_set() {
        let keyword = Keyword::new("keto");
        let entry = CacheEntry::new(&keyword, "s", vec![]);
        let err = from_exact_entry(&entry, &[]).unwrap_err();
        assert!(matches!(err, ReconstructError::EmptyChunkSet { .. }));
    }

    #[test]
    fn malformed_metadata_is_an_error_not_a_default() {
        let keyword = Keyword::new("keto");
        let entry = CacheEntry::new(&keyword, "s", vec![]);
        let chunk = ChunkRecord::new("keto", "src", 0, "text")
            .with_metadata(serde_json::json!({"unexpected": true}));
        let err = from_exact_entry(&entry, &[chunk]).unwrap_err();
        assert!(matches!(err, ReconstructError::Metadata(_)));
    }
}
