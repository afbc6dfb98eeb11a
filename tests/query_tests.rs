//! Hybrid query engine integration tests.

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use common::{build_kb, build_mock_kb, test_config, write_fixture, FailingEmbedder};

#[tokio::test]
async fn test_seed_plus_one_hop_scenario() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let t = build_mock_kb(test_config());
    t.kb.initialize().await.unwrap();
    t.kb.ingest(dir.path()).await.unwrap();

    let context = t
        .kb
        .retrieve("validate payload checksum records")
        .await
        .unwrap();

    // The checksum function seeds the context.
    assert!(!context.is_empty());
    let top = &context.entries[0];
    assert_eq!(top.entity.qualified_name, "compute_checksum");
    assert!(top.is_seed);
    assert_eq!(top.hops, 0);

    // Its callee arrives by expansion, one hop out.
    let helper = context
        .entries
        .iter()
        .find(|e| e.entity.qualified_name == "helper_total")
        .expect("helper_total reached by expansion");
    assert!(!helper.is_seed);
    assert_eq!(helper.hops, 1);
    assert!(helper.score < top.score);

    // The unrelated file never appears.
    assert!(context
        .entries
        .iter()
        .all(|e| e.entity.qualified_name != "unrelated_banner"));
}

#[tokio::test]
async fn test_retrieval_is_deterministic() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let t = build_mock_kb(test_config());
    t.kb.initialize().await.unwrap();
    t.kb.ingest(dir.path()).await.unwrap();

    let first = t.kb.retrieve("validate payload checksum records").await.unwrap();
    let second = t.kb.retrieve("validate payload checksum records").await.unwrap();

    let ids_first: Vec<_> = first.entries.iter().map(|e| e.entity.id.clone()).collect();
    let ids_second: Vec<_> = second.entries.iter().map(|e| e.entity.id.clone()).collect();
    assert_eq!(ids_first, ids_second);
    for (a, b) in first.entries.iter().zip(&second.entries) {
        assert_eq!(a.score, b.score);
        assert_eq!(a.hops, b.hops);
    }
}

#[tokio::test]
async fn test_ranking_is_monotone_in_score_then_hops() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let mut config = test_config();
    config.query.top_k = 4;
    config.query.max_hops = 2;
    let t = build_mock_kb(config);
    t.kb.initialize().await.unwrap();
    t.kb.ingest(dir.path()).await.unwrap();

    let context = t.kb.retrieve("validate payload checksum records").await.unwrap();
    for pair in context.entries.windows(2) {
        assert!(
            pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score && pair[0].hops <= pair[1].hops),
            "ranking order violated"
        );
    }
    // Expanded scores are discounted below the best score that could
    // have reached them.
    let best_seed = context
        .entries
        .iter()
        .filter(|e| e.is_seed)
        .map(|e| e.score)
        .fold(f32::NEG_INFINITY, f32::max);
    for entry in context.entries.iter().filter(|e| !e.is_seed) {
        assert!(entry.score <= best_seed * 0.5 + f32::EPSILON);
    }
}

#[tokio::test]
async fn test_high_threshold_yields_empty_context() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let mut config = test_config();
    config.query.min_similarity = 0.99;
    let t = build_mock_kb(config);
    t.kb.initialize().await.unwrap();
    t.kb.ingest(dir.path()).await.unwrap();

    let context = t.kb.retrieve("validate payload checksum records").await.unwrap();
    assert!(context.is_empty());
}

#[tokio::test]
async fn test_zero_hops_returns_seeds_only() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let mut config = test_config();
    config.query.max_hops = 0;
    let t = build_mock_kb(config);
    t.kb.initialize().await.unwrap();
    t.kb.ingest(dir.path()).await.unwrap();

    let context = t.kb.retrieve("validate payload checksum records").await.unwrap();
    assert!(!context.is_empty());
    assert!(context.entries.iter().all(|e| e.is_seed));
}

#[tokio::test]
async fn test_entity_budget_caps_context_size() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let mut config = test_config();
    config.query.top_k = 4;
    config.query.max_hops = 2;
    config.query.entity_budget = 2;
    let t = build_mock_kb(config);
    t.kb.initialize().await.unwrap();
    t.kb.ingest(dir.path()).await.unwrap();

    let context = t.kb.retrieve("validate payload checksum records").await.unwrap();
    assert!(context.entries.len() <= 2);
}

#[tokio::test]
async fn test_failed_batch_entities_never_seed() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let mut config = test_config();
    // One entity per batch so only the marked text fails.
    config.ingest.batch_size = 1;
    config.query.top_k = 8;
    let t = build_kb(
        config,
        Arc::new(FailingEmbedder {
            marker: "unrelated_banner",
        }),
    );
    t.kb.initialize().await.unwrap();

    let report = t.kb.ingest(dir.path()).await.unwrap();
    assert_eq!(report.embeddings_failed.len(), 1);
    assert_eq!(report.embeddings_written, 2);

    // The graph node exists, but no query can seed from it.
    let stats = t.kb.stats().await.unwrap();
    assert_eq!(stats.nodes, 6);
    assert_eq!(stats.vectors, 2);

    let context = t.kb.retrieve("print the startup banner").await.unwrap();
    assert!(context
        .entries
        .iter()
        .filter(|e| e.is_seed)
        .all(|e| e.entity.qualified_name != "unrelated_banner"));
}
