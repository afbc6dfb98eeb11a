//! End-to-end context assembly tests.

mod common;

use tempfile::TempDir;

use common::{build_mock_kb, test_config, write_fixture};

#[tokio::test]
async fn test_assembled_payload_respects_token_budget() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let mut config = test_config();
    config.query.top_k = 4;
    config.context.token_budget = 60;
    let t = build_mock_kb(config);
    t.kb.initialize().await.unwrap();
    t.kb.ingest(dir.path()).await.unwrap();

    let payload = t
        .kb
        .retrieve_context("validate payload checksum records")
        .await
        .unwrap();
    assert!(payload.tokens_used <= 60);
    // Whatever did not fit is reported, never truncated.
    assert!(payload.included.len() + payload.dropped >= 1);
}

#[tokio::test]
async fn test_payload_renders_seed_and_hop_blocks() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let t = build_mock_kb(test_config());
    t.kb.initialize().await.unwrap();
    t.kb.ingest(dir.path()).await.unwrap();

    let payload = t
        .kb
        .retrieve_context("validate payload checksum records")
        .await
        .unwrap();
    assert!(payload.rendered.contains("a.py [function] compute_checksum (seed"));
    assert!(payload.rendered.contains("b.py [function] helper_total (hop 1"));
    assert!(payload.rendered.contains("def compute_checksum(payload):"));
    assert_eq!(payload.dropped, 0);
}

#[tokio::test]
async fn test_empty_retrieval_yields_empty_payload() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let mut config = test_config();
    config.query.min_similarity = 0.99;
    let t = build_mock_kb(config);
    t.kb.initialize().await.unwrap();
    t.kb.ingest(dir.path()).await.unwrap();

    let payload = t
        .kb
        .retrieve_context("validate payload checksum records")
        .await
        .unwrap();
    assert!(payload.rendered.is_empty());
    assert!(payload.included.is_empty());
    assert_eq!(payload.tokens_used, 0);
}

#[tokio::test]
async fn test_assembly_is_deterministic_end_to_end() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let t = build_mock_kb(test_config());
    t.kb.initialize().await.unwrap();
    t.kb.ingest(dir.path()).await.unwrap();

    let first = t
        .kb
        .retrieve_context("validate payload checksum records")
        .await
        .unwrap();
    let second = t
        .kb
        .retrieve_context("validate payload checksum records")
        .await
        .unwrap();
    assert_eq!(first.rendered, second.rendered);
    assert_eq!(first.included, second.included);
    assert_eq!(first.tokens_used, second.tokens_used);
}
