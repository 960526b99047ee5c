//! Deterministic test doubles for the injected capabilities.
//!
//! [`MockEmbedder`] produces repeatable vectors with no model behind it:
//! suitable for CI, integration tests, and offline development. Vectors for
//! specific texts can be pinned with [`MockEmbedder::with_vector`] when a
//! test needs to control similarity between two keywords exactly.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use rustc_hash::FxHasher;

use crate::capabilities::{CapabilityError, Embedder};

/// Hash-seeded embedder with optional pinned vectors.
///
/// Unpinned texts get a bag-of-words vector: each whitespace token seeds a
/// small deterministic generator whose output is accumulated and normalized,
/// so texts sharing tokens land near each other and disjoint texts do not.
#[derive(Clone, Debug)]
pub struct MockEmbedder {
    dimension: usize,
    pinned: HashMap<String, Vec<f32>>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(1536)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            pinned: HashMap::new(),
        }
    }

    /// Pin the exact vector returned for `text`.
    ///
    /// The vector is normalized to unit length on insertion. Panics if its
    /// length does not match the embedder's dimension (a test wiring bug).
    #[must_use]
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        assert_eq!(
            vector.len(),
            self.dimension,
            "pinned vector length must match the embedder dimension"
        );
        self.pinned.insert(text.into(), unit(&vector));
        self
    }

    fn synthesize(&self, text: &str) -> Vec<f32> {
        let mut accumulated = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let mut hasher = FxHasher::default();
            token.to_lowercase().hash(&mut hasher);
            let mut state = hasher.finish() | 1;
            for slot in &mut accumulated {
                // xorshift64 seeded by the token hash; no RNG state survives
                // between calls, so output never varies across runs.
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                *slot += ((state % 2000) as f32 / 1000.0) - 1.0;
            }
        }
        if accumulated.iter().all(|v| *v == 0.0) {
            accumulated[0] = 1.0;
        }
        unit(&accumulated)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        Ok(texts
            .iter()
            .map(|text| {
                self.pinned
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.synthesize(text))
            })
            .collect())
    }
}

fn unit(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}
