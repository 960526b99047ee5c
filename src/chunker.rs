//! Splits long text into overlapping, size-bounded segments.
//!
//! The chunker is the only piece of the ingestion path that is pure CPU: no
//! I/O, no clock, no randomness. Identical input and configuration always
//! produce identical chunk boundaries, which is what makes re-chunking of
//! cached sources idempotent.
//!
//! Splitting is sentence-first: sentences (per Unicode sentence bounds) are
//! packed greedily up to `target_size` characters, and the tail `overlap`
//! characters of each chunk are carried into the head of the next so context
//! spanning a boundary is preserved. A single sentence longer than
//! `target_size` is hard-split as a last resort.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Chunking configuration.
///
/// Defaults match the persisted-chunk layout the retrieval pipeline expects:
/// 1000-character targets with a 200-character overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Upper bound on chunk length in characters.
    pub target_size: usize,
    /// Characters carried from the tail of one chunk into the next.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_size: 1000,
            overlap: 200,
        }
    }
}

/// One bounded segment of a larger text.
///
/// `index` is dense and zero-based within the text the span was cut from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    pub index: usize,
    pub text: String,
}

/// Deterministic sentence-first text chunker.
#[derive(Clone, Debug, Default)]
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        // A pathological overlap >= target would re-emit whole chunks forever.
        let overlap = config.overlap.min(config.target_size.saturating_sub(1));
        Self {
            config: ChunkerConfig {
                target_size: config.target_size.max(1),
                overlap,
            },
        }
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Split `text` into overlapping spans.
    ///
    /// Empty or whitespace-only input yields an empty vec, not an error.
    pub fn chunk(&self, text: &str) -> Vec<ChunkSpan> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let target = self.config.target_size;
        let mut pieces: Vec<String> = Vec::new();
        for sentence in text.unicode_sentences() {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            if sentence.chars().count() > target {
                pieces.extend(hard_split(sentence, target));
            } else {
                pieces.push(sentence.to_string());
            }
        }

        let mut spans = Vec::new();
        let mut current = String::new();
        for piece in pieces {
            let current_len = current.chars().count();
            let piece_len = piece.chars().count();
            let joiner = usize::from(!current.is_empty());
            if current_len + joiner + piece_len > target && !current.is_empty() {
                let carry = tail_chars(&current, self.config.overlap);
                spans.push(ChunkSpan {
                    index: spans.len(),
                    text: std::mem::take(&mut current),
                });
                current = carry;
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }
        if !current.trim().is_empty() {
            spans.push(ChunkSpan {
                index: spans.len(),
                text: current,
            });
        }
        spans
    }
}

/// Last-resort split of a single oversized sentence into `target`-char runs.
fn hard_split(sentence: &str, target: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(target)
        .map(|window| window.iter().collect())
        .collect()
}

/// The final `count` characters of `text`, aligned to a word boundary where
/// one exists inside the window.
fn tail_chars(text: &str, count: usize) -> String {
    if count == 0 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= count {
        return text.to_string();
    }
    let tail: String = chars[chars.len() - count..].iter().collect();
    match tail.find(' ') {
        Some(pos) if pos + 1 < tail.len() => tail[pos + 1..].to_string(),
        _ => tail,
    }
}
