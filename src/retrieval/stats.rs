//! Process-lifetime retrieval counters.
//!
//! The statistics object is explicitly owned and injected into the
//! orchestrator at construction, not reached through a module-level
//! singleton, so tests get isolated counters and one process can host
//! several independent orchestrators. Counters are read concurrently and written with
//! per-counter atomic updates; they reset only when the process restarts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Which tier resolved a retrieval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetrievalOutcome {
    Exact,
    Semantic,
    Miss,
}

/// Atomically updated counters for retrieval outcomes.
#[derive(Debug, Default)]
pub struct RetrievalStatistics {
    exact_hits: AtomicU64,
    semantic_hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    exact_micros: AtomicU64,
    semantic_micros: AtomicU64,
    miss_micros: AtomicU64,
}

impl RetrievalStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one resolved retrieval and the time it took.
    pub fn record(&self, outcome: RetrievalOutcome, elapsed: Duration) {
        let micros = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        match outcome {
            RetrievalOutcome::Exact => {
                self.exact_hits.fetch_add(1, Ordering::Relaxed);
                self.exact_micros.fetch_add(micros, Ordering::Relaxed);
            }
            RetrievalOutcome::Semantic => {
                self.semantic_hits.fetch_add(1, Ordering::Relaxed);
                self.semantic_micros.fetch_add(micros, Ordering::Relaxed);
            }
            RetrievalOutcome::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.miss_micros.fetch_add(micros, Ordering::Relaxed);
            }
        }
    }

    /// Record a non-fatal error observed along the way (absorbed lookup or
    /// caching failures); these never correspond to a failed caller request.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent point-in-time snapshot with derived metrics.
    pub fn snapshot(&self) -> StatsSnapshot {
        let exact_hits = self.exact_hits.load(Ordering::Relaxed);
        let semantic_hits = self.semantic_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let resolved = exact_hits + semantic_hits + misses;
        let hit_rate = if resolved == 0 {
            0.0
        } else {
            (exact_hits + semantic_hits) as f64 / resolved as f64
        };
        StatsSnapshot {
            exact_hits,
            semantic_hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate,
            avg_exact_ms: mean_ms(self.exact_micros.load(Ordering::Relaxed), exact_hits),
            avg_semantic_ms: mean_ms(self.semantic_micros.load(Ordering::Relaxed), semantic_hits),
            avg_miss_ms: mean_ms(self.miss_micros.load(Ordering::Relaxed), misses),
        }
    }
}

fn mean_ms(total_micros: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total_micros as f64 / count as f64 / 1000.0
    }
}

/// Read-only view of the counters plus derived rates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// `(exact + semantic) / (exact + semantic + misses)`; 0 before any
    /// retrieval resolves.
    pub hit_rate: f64,
    pub avg_exact_ms: f64,
    pub avg_semantic_ms: f64,
    pub avg_miss_ms: f64,
}
