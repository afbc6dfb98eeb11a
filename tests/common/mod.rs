//! Shared test harness: deterministic embedders, in-memory backends,
//! and the three-file fixture repository.

use std::path::Path;
use std::sync::Arc;

use patchgraph::config::Config;
use patchgraph::knowledge::backend::MemoryBackend;
use patchgraph::knowledge::embedder::Embedder;
use patchgraph::knowledge::KnowledgeBase;
use patchgraph::KnowledgeError;

const DIMENSION: usize = 64;

/// Deterministic bag-of-words embedder. Related texts share word
/// buckets, so cosine similarity behaves like a crude but stable
/// semantic model.
pub struct MockEmbedder;

impl MockEmbedder {
    fn bucket(word: &str) -> usize {
        let hash = word
            .bytes()
            .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64));
        (hash % DIMENSION as u64) as usize
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIMENSION];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[Self::bucket(word)] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "mock-bag-of-words"
    }
}

/// Embedder that fails every batch containing the marker substring.
pub struct FailingEmbedder {
    pub marker: &'static str,
}

impl Embedder for FailingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        if texts.iter().any(|t| t.contains(self.marker)) {
            return Err(KnowledgeError::Embedding(format!(
                "refusing batch containing {:?}",
                self.marker
            )));
        }
        MockEmbedder.embed(texts)
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "mock-bag-of-words"
    }
}

/// Config tuned for fast, deterministic tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.ingest.batch_size = 4;
    config.ingest.concurrency = 2;
    config.ingest.max_retries = 2;
    config.ingest.retry_base_delay_ms = 1;
    config.query.top_k = 1;
    config.query.min_similarity = 0.05;
    config.query.max_hops = 1;
    config.query.entity_budget = 16;
    config.query.hop_decay = 0.5;
    config.context.token_budget = 2000;
    config.validate().expect("test config must be valid");
    config
}

/// Knowledge base over an in-memory backend, with the backend handle
/// kept for direct assertions.
pub struct TestKb {
    pub kb: KnowledgeBase,
    pub backend: Arc<MemoryBackend>,
}

pub fn build_kb(config: Config, embedder: Arc<dyn Embedder>) -> TestKb {
    let backend = Arc::new(MemoryBackend::new());
    let kb = KnowledgeBase::with_backends(backend.clone(), backend.clone(), embedder, config);
    TestKb { kb, backend }
}

pub fn build_mock_kb(config: Config) -> TestKb {
    build_kb(config, Arc::new(MockEmbedder))
}

/// Three-file fixture: `a.py` validates checksums and calls into
/// `b.py`; `c.py` is unrelated.
pub fn write_fixture(dir: &Path) {
    std::fs::write(
        dir.join("a.py"),
        "from b import helper_total\n\
         \n\
         \n\
         def compute_checksum(payload):\n\
         \x20   \"\"\"Validate the payload checksum before storing records.\"\"\"\n\
         \x20   return helper_total(payload) % 256\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("b.py"),
        "def helper_total(payload):\n\
         \x20   \"\"\"Sum the payload bytes.\"\"\"\n\
         \x20   return sum(payload)\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("c.py"),
        "def unrelated_banner():\n\
         \x20   \"\"\"Print the startup banner.\"\"\"\n\
         \x20   print(\"banner\")\n",
    )
    .unwrap();
}
