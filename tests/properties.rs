//! Property tests for the pure building blocks: keyword normalization and
//! chunk determinism hold for arbitrary input, not just the fixtures.

#[macro_use]
extern crate proptest;

use proptest::prelude::prop;

use keywordsmith::chunker::{ChunkerConfig, TextChunker};
use keywordsmith::types::{Keyword, cache_entry_id, normalize};

proptest! {
    /// normalize(normalize(k)) == normalize(k) for every keyword.
    #[test]
    fn prop_normalization_is_idempotent(raw in prop::string::string_regex(".{0,64}").unwrap()) {
        let once = normalize(&raw);
        prop_assert_eq!(normalize(&once), once);
    }

    /// Normalization is total and never yields stray whitespace.
    #[test]
    fn prop_normalized_form_is_canonical(raw in prop::string::string_regex("[A-Za-zÀ-ÿ0-9 \t]{0,64}").unwrap()) {
        let normalized = normalize(&raw);
        prop_assert_eq!(normalized.trim(), normalized.as_str());
        prop_assert!(!normalized.contains("  "));
        prop_assert!(!normalized.chars().any(char::is_uppercase));
    }

    /// The deterministic entry id depends only on the normalized form.
    #[test]
    fn prop_entry_id_tracks_normalization(raw in prop::string::string_regex("[ A-Za-z0-9]{1,40}").unwrap()) {
        let keyword = Keyword::new(raw.as_str());
        prop_assert_eq!(keyword.entry_id(), cache_entry_id(keyword.normalized()));
        let spaced = format!("  {}  ", raw.to_uppercase());
        prop_assert_eq!(Keyword::new(spaced).entry_id(), keyword.entry_id());
    }

    /// Identical input and config always produce identical chunk boundaries.
    #[test]
    fn prop_chunking_is_deterministic(
        text in prop::string::string_regex("[A-Za-z0-9 .,!?]{0,2000}").unwrap(),
        target in 20usize..400,
        overlap in 0usize..100,
    ) {
        let chunker = TextChunker::new(ChunkerConfig { target_size: target, overlap });
        let a = chunker.chunk(&text);
        let b = chunker.chunk(&text);
        prop_assert_eq!(a, b);
    }

    /// Chunk indexes are dense and zero-based, and no chunk is empty.
    #[test]
    fn prop_chunk_indexes_are_dense(
        text in prop::string::string_regex("[A-Za-z .]{0,1500}").unwrap(),
        target in 30usize..300,
    ) {
        let chunker = TextChunker::new(ChunkerConfig { target_size: target, overlap: target / 5 });
        for (i, span) in chunker.chunk(&text).into_iter().enumerate() {
            prop_assert_eq!(span.index, i);
            prop_assert!(!span.text.trim().is_empty());
        }
    }
}
