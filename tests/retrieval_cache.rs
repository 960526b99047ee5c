//! Integration tests for the three-tier retrieval chain over a real on-disk
//! SQLite database: round-trips, deduplication, expiry, and the semantic
//! threshold behavior.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;

use keywordsmith::store::{ChunkRecord, SearchFilters, VectorStore};
use keywordsmith::testing::MockEmbedder;
use keywordsmith::types::{Findings, Keyword};

use common::{
    CannedResearch, DownEmbedder, FailingResearch, orchestrator, orchestrator_with,
    sample_findings, test_config,
};

#[tokio::test]
async fn cache_round_trip_never_reinvokes_research() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, 16);
    let keyword = Keyword::new("solar panel efficiency");
    let canned = CannedResearch::new(sample_findings(
        "solar panel efficiency",
        "Panel efficiency has climbed steadily over the past decade.",
        3,
    ));

    let first = orch.retrieve_or_research(&keyword, &canned).await.unwrap();
    assert_eq!(canned.call_count(), 1);
    assert!(first.is_consistent());

    let failing = FailingResearch::new();
    let second = orch.retrieve_or_research(&keyword, &failing).await.unwrap();
    assert_eq!(failing.call_count(), 0, "cache hit must not invoke research");
    assert_eq!(second.summary, first.summary);
    assert_eq!(second.sources.len(), first.sources.len());
    assert_eq!(second.main_findings, first.main_findings);

    let snap = orch.statistics();
    assert_eq!(snap.misses, 1);
    assert_eq!(snap.exact_hits, 1);
    assert!((snap.hit_rate - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn blood_sugar_scenario_tracks_hit_counts() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, 16);
    let keyword = Keyword::new("blood sugar monitoring");
    let summary = "Continuous glucose monitoring improves glycemic awareness. ".repeat(9);
    assert!(summary.len() >= 500);
    let canned = CannedResearch::new(sample_findings("blood sugar monitoring", &summary, 3));

    let first = orch.retrieve_or_research(&keyword, &canned).await.unwrap();
    assert_eq!(canned.call_count(), 1);

    let entry = orch
        .ledger()
        .peek("blood sugar monitoring")
        .await
        .unwrap()
        .expect("entry created on first research");
    assert_eq!(entry.hit_count, 0);
    assert!(!entry.chunk_ids.is_empty(), "summary must chunk into >= 1 chunk");

    let chunks = orch
        .store()
        .chunks_by_keyword("blood sugar monitoring")
        .await
        .unwrap();
    assert_eq!(chunks.len(), entry.chunk_ids.len());
    assert!(chunks.iter().all(|c| c.keyword == "blood sugar monitoring"));

    let failing = FailingResearch::new();
    let second = orch.retrieve_or_research(&keyword, &failing).await.unwrap();
    assert_eq!(failing.call_count(), 0);
    assert_eq!(second.summary, first.summary);

    let entry = orch
        .ledger()
        .peek("blood sugar monitoring")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.hit_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_research_run() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, 16);
    let canned = Arc::new(
        CannedResearch::new(sample_findings(
            "rust async runtimes",
            "Runtimes multiplex many tasks over a small thread pool.",
            2,
        ))
        .with_delay(Duration::from_millis(100)),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orch = Arc::clone(&orch);
        let canned = Arc::clone(&canned);
        let fut: std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Findings, keywordsmith::retrieval::RetrievalError>> + Send>,
        > = Box::pin(async move {
            let keyword = Keyword::new("Rust Async Runtimes");
            orch.retrieve_or_research(&keyword, canned.as_ref()).await
        });
        handles.push(tokio::spawn(fut));
    }
    let mut summaries = Vec::new();
    for handle in handles {
        summaries.push(handle.await.unwrap().unwrap().summary);
    }

    assert_eq!(canned.call_count(), 1, "exactly one research run for 8 callers");
    assert!(summaries.windows(2).all(|w| w[0] == w[1]));

    let snap = orch.statistics();
    assert_eq!(snap.misses, 1);
    assert_eq!(snap.exact_hits, 7);
}

#[tokio::test]
async fn soft_expiry_is_a_miss_but_hard_sweep_deletes() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, 16);
    let keyword = Keyword::new("vitamin d dosage");
    let canned = CannedResearch::new(sample_findings(
        "vitamin d dosage",
        "Recommended intake varies with latitude and season.",
        2,
    ));
    orch.retrieve_or_research(&keyword, &canned).await.unwrap();
    assert_eq!(canned.call_count(), 1);

    // Age the entry to 8 days old with a TTL that lapsed yesterday.
    let now = Utc::now();
    sqlx::query("UPDATE cache_entries SET created_at = ?, expires_at = ?")
        .bind(now - ChronoDuration::days(8))
        .bind(now - ChronoDuration::days(1))
        .execute(orch.store().pool())
        .await
        .unwrap();

    // Soft-expired: lookup treats it as a miss and research runs again...
    let again = CannedResearch::new(sample_findings(
        "vitamin d dosage",
        "Fresh guidance after the stale entry was bypassed.",
        2,
    ));
    let refreshed = orch.retrieve_or_research(&keyword, &again).await.unwrap();
    assert_eq!(again.call_count(), 1);
    assert!(refreshed.summary.starts_with("Fresh guidance"));

    // ...but a soft-expired row itself survives the max-age sweep while it
    // is younger than the 30-day ceiling.
    sqlx::query("UPDATE cache_entries SET created_at = ?, expires_at = ?")
        .bind(now - ChronoDuration::days(8))
        .bind(now - ChronoDuration::days(1))
        .execute(orch.store().pool())
        .await
        .unwrap();
    assert_eq!(orch.ledger().evict_expired_beyond_max_age().await.unwrap(), 0);
    assert_eq!(orch.ledger().entry_count().await.unwrap(), 1);

    // The retained stale row stays auditable.
    let entries = orch.ledger().entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_soft_expired(Utc::now()));
    assert_eq!(entries[0].normalized_keyword, "vitamin d dosage");

    // Past the ceiling the sweep removes the entry and its chunks.
    sqlx::query("UPDATE cache_entries SET created_at = ?")
        .bind(now - ChronoDuration::days(31))
        .execute(orch.store().pool())
        .await
        .unwrap();
    assert_eq!(orch.ledger().evict_expired_beyond_max_age().await.unwrap(), 1);
    assert_eq!(orch.ledger().entry_count().await.unwrap(), 0);
    assert_eq!(orch.store().count().await.unwrap(), 0);
}

/// "keto" vs a cached "ketogenic diet" at 0.82 similarity: a semantic hit at
/// threshold 0.8, a miss once the threshold is raised to 0.9.
#[tokio::test]
async fn semantic_neighbor_hits_at_low_threshold_only() {
    let dir = TempDir::new().unwrap();
    let summary = "Ketogenic diets reduce carbohydrate intake substantially.";
    let embedder = Arc::new(
        MockEmbedder::new(4)
            .with_vector(summary, vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("ketogenic diet", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("keto", vec![0.82, (1.0f32 - 0.82 * 0.82).sqrt(), 0.0, 0.0]),
    );

    let config = test_config(&dir, 4);
    let orch = orchestrator_with(config.clone(), embedder.clone());

    // Cache "ketogenic diet" with a single-chunk summary document.
    let cached = Findings {
        sources: vec![],
        main_findings: vec![],
        statistics: vec![],
        gaps: vec![],
        total_sources_analyzed: 2,
        ..sample_findings("Ketogenic Diet", summary, 0)
    };
    let seed = CannedResearch::new(cached);
    orch.retrieve_or_research(&Keyword::new("Ketogenic Diet"), &seed)
        .await
        .unwrap();

    // 0.82 >= 0.8: semantic hit, no research.
    let failing = FailingResearch::new();
    let hit = orch
        .retrieve_or_research(&Keyword::new("keto"), &failing)
        .await
        .unwrap();
    assert_eq!(failing.call_count(), 0);
    assert_eq!(hit.summary, summary);
    assert_eq!(orch.statistics().semantic_hits, 1);

    // Same database, threshold 0.9: 0.82 no longer qualifies.
    let mut strict_config = config;
    strict_config.retrieval.similarity_threshold = 0.9;
    let strict = orchestrator_with(strict_config, embedder);
    let fresh = CannedResearch::new(sample_findings(
        "keto",
        "A fresh look at ketosis and its tradeoffs.",
        1,
    ));
    let missed = strict
        .retrieve_or_research(&Keyword::new("keto"), &fresh)
        .await
        .unwrap();
    assert_eq!(fresh.call_count(), 1);
    assert!(missed.summary.starts_with("A fresh look"));
    assert_eq!(strict.statistics().misses, 1);
    assert_eq!(strict.statistics().semantic_hits, 0);
}

#[tokio::test]
async fn similarity_threshold_boundary_is_inclusive() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 2);
    let store = VectorStore::connect_lazy(config.store).unwrap();

    let at_threshold = ChunkRecord::new("topic a", "src", 0, "exactly at the line")
        .with_embedding(vec![0.8, 0.6]);
    let below = ChunkRecord::new("topic b", "src", 0, "just under the line")
        .with_embedding(vec![0.79, (1.0f32 - 0.79 * 0.79).sqrt()]);
    let report = store.store_chunks(vec![at_threshold, below]).await.unwrap();
    assert!(report.is_complete());

    let results = store
        .search(&[1.0, 0.0], 0.8, 10, &SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1, "only the at-threshold chunk qualifies");
    assert_eq!(results[0].chunk.keyword, "topic a");
    assert!(results[0].score >= 0.8);
}

#[tokio::test]
async fn search_filters_narrow_by_source_metadata() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 2);
    let store = VectorStore::connect_lazy(config.store).unwrap();

    let source_meta = |domain: &str, source_type: &str, credibility: f32| {
        serde_json::json!({
            "kind": "source_excerpt",
            "source": {
                "title": "t",
                "url": format!("https://{domain}/x"),
                "domain": domain,
                "credibility_score": credibility,
                "excerpt": "e",
                "source_type": source_type,
                "authors": [],
                "publication_date": null,
            }
        })
    };
    let official = ChunkRecord::new("topic", "src-a", 0, "official guidance")
        .with_embedding(vec![1.0, 0.0])
        .with_metadata(source_meta("cdc.gov", "government", 0.9));
    let casual = ChunkRecord::new("topic", "src-b", 0, "casual take")
        .with_embedding(vec![1.0, 0.0])
        .with_metadata(source_meta("myblog.net", "blog", 0.3));
    store.store_chunks(vec![official, casual]).await.unwrap();

    let query = [1.0, 0.0];
    let by_domain = store
        .search(
            &query,
            0.5,
            10,
            &SearchFilters {
                domain: Some("cdc.gov".to_string()),
                ..SearchFilters::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(by_domain.len(), 1);
    assert_eq!(by_domain[0].chunk.source_id, "src-a");

    let by_credibility = store
        .search(
            &query,
            0.5,
            10,
            &SearchFilters {
                min_credibility: Some(0.5),
                ..SearchFilters::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(by_credibility.len(), 1);
    assert_eq!(by_credibility[0].chunk.source_id, "src-a");

    let by_type = store
        .search(
            &query,
            0.5,
            10,
            &SearchFilters {
                source_type: Some(keywordsmith::SourceType::Blog),
                ..SearchFilters::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].chunk.source_id, "src-b");
}

#[tokio::test]
async fn warm_cache_skips_live_entries_and_survives_failures() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, 16);

    let seeded = Keyword::new("already cached topic");
    let seed = CannedResearch::new(sample_findings(
        "already cached topic",
        "This one is in cache before warming begins.",
        1,
    ));
    orch.retrieve_or_research(&seeded, &seed).await.unwrap();

    let keywords = vec![
        seeded,
        Keyword::new("newly warmed topic"),
        Keyword::new("another warmed topic"),
    ];
    let canned = CannedResearch::new(sample_findings(
        "warmed",
        "Produced during the warming batch.",
        1,
    ));
    let report = orch.warm_cache(&keywords, &canned).await;
    assert_eq!(report.skipped, 1);
    assert_eq!(report.warmed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(canned.call_count(), 2);

    // Failures are counted without aborting the rest of the batch.
    let failing = FailingResearch::new();
    let report = orch
        .warm_cache(
            &[Keyword::new("unreachable one"), Keyword::new("unreachable two")],
            &failing,
        )
        .await;
    assert_eq!(report.failed, 2);
    assert_eq!(report.warmed, 0);
    assert_eq!(failing.call_count(), 2);
}

#[tokio::test]
async fn embedder_outage_degrades_caching_but_returns_findings() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator_with(test_config(&dir, 16), Arc::new(DownEmbedder::new(16)));
    let keyword = Keyword::new("offline embedding topic");
    let canned = CannedResearch::new(sample_findings(
        "offline embedding topic",
        "Findings computed while the embedder was down.",
        2,
    ));

    let first = orch.retrieve_or_research(&keyword, &canned).await.unwrap();
    assert!(first.is_consistent());
    assert!(orch.statistics().errors > 0, "absorbed failures are counted");

    // Chunks were stored without vectors; the exact tier still works.
    let failing = FailingResearch::new();
    let second = orch.retrieve_or_research(&keyword, &failing).await.unwrap();
    assert_eq!(failing.call_count(), 0);
    assert_eq!(second.summary, first.summary);
}

#[tokio::test]
async fn research_failure_with_no_cache_surfaces_one_error() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, 16);
    let failing = FailingResearch::new();
    let err = orch
        .retrieve_or_research(&Keyword::new("never seen before"), &failing)
        .await
        .unwrap_err();
    assert_eq!(failing.call_count(), 1);
    let message = err.to_string();
    assert!(message.contains("research unavailable"), "got: {message}");
}

#[tokio::test]
async fn orphan_chunk_sweep_reclaims_unreferenced_rows() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(&dir, 16);
    let canned = CannedResearch::new(sample_findings(
        "referenced topic",
        "Chunks for this one are referenced by a ledger entry.",
        1,
    ));
    orch.retrieve_or_research(&Keyword::new("referenced topic"), &canned)
        .await
        .unwrap();
    let referenced = orch.store().count().await.unwrap();

    // A chunk written with no ledger entry behind it (crash between writes).
    let orphan = ChunkRecord::new("orphan keyword", "src", 0, "dangling text");
    orch.store().store_chunks(vec![orphan]).await.unwrap();
    assert_eq!(orch.store().count().await.unwrap(), referenced + 1);

    let removed = orch.store().delete_orphan_chunks().await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(orch.store().count().await.unwrap(), referenced);
}

#[tokio::test]
async fn orchestrator_instances_keep_independent_statistics() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = orchestrator(&dir_a, 16);
    let b = orchestrator(&dir_b, 16);

    let canned = CannedResearch::new(sample_findings("isolated", "Separate worlds.", 1));
    a.retrieve_or_research(&Keyword::new("isolated"), &canned)
        .await
        .unwrap();
    assert_eq!(a.statistics().misses, 1);
    assert_eq!(b.statistics().misses, 0);
}
