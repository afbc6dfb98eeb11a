//! Embedding pipeline: batching, retry with backoff, and a per-run
//! content-hash cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use super::embedder::Embedder;
use super::error::KnowledgeError;
use super::models::EntityId;

/// Result of embedding a set of entities.
#[derive(Debug, Default)]
pub struct EmbeddingOutcome {
    /// Vectors ready to index, in input order.
    pub embedded: Vec<(EntityId, Vec<f32>)>,
    /// Entities served from the per-run content-hash cache.
    pub reused: usize,
    /// Entities whose batch failed after all retries. Excluded from the
    /// vector index; their graph nodes remain.
    pub failed: Vec<EntityId>,
}

/// Batches entity text through an [`Embedder`], retrying failed batches
/// with exponential backoff and reusing vectors for identical source text.
pub struct EmbeddingPipeline {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    max_retries: u32,
    base_delay: Duration,
    /// content hash -> vector, scoped to the pipeline's lifetime (one run).
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl EmbeddingPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        max_retries: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            max_retries,
            base_delay,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Embed the query text itself.
    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        let vectors = self.embedder.embed(&[text.to_string()])?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| KnowledgeError::Embedding("Model returned no vectors".to_string()))
    }

    /// Embed entities given as `(id, content hash, text)` triples.
    ///
    /// Identical hashes reuse the cached vector. A batch that keeps
    /// failing marks all of its entities failed and the run continues.
    pub async fn embed_entities(&self, items: &[(EntityId, String, String)]) -> EmbeddingOutcome {
        let mut outcome = EmbeddingOutcome::default();
        let mut batch: Vec<(EntityId, String, String)> = Vec::new();

        for (id, hash, text) in items {
            let cached = {
                let cache = self.cache.lock().unwrap();
                cache.get(hash).cloned()
            };
            if let Some(vector) = cached {
                outcome.embedded.push((id.clone(), vector));
                outcome.reused += 1;
                continue;
            }

            batch.push((id.clone(), hash.clone(), text.clone()));
            if batch.len() >= self.batch_size {
                self.flush_batch(&mut batch, &mut outcome).await;
            }
        }
        self.flush_batch(&mut batch, &mut outcome).await;

        outcome
    }

    async fn flush_batch(
        &self,
        batch: &mut Vec<(EntityId, String, String)>,
        outcome: &mut EmbeddingOutcome,
    ) {
        if batch.is_empty() {
            return;
        }
        let items = std::mem::take(batch);
        let texts: Vec<String> = items.iter().map(|(_, _, text)| text.clone()).collect();

        match self.embed_with_retry(&texts).await {
            Ok(vectors) => {
                let mut cache = self.cache.lock().unwrap();
                for ((id, hash, _), vector) in items.into_iter().zip(vectors) {
                    cache.insert(hash, vector.clone());
                    outcome.embedded.push((id, vector));
                }
            }
            Err(e) => {
                warn!(batch_len = texts.len(), error = %e, "embedding batch failed, excluding entities");
                outcome.failed.extend(items.into_iter().map(|(id, _, _)| id));
            }
        }
    }

    /// One batch through the model, with exponential backoff between
    /// attempts. A length mismatch counts as a failed attempt.
    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_retries.max(1) {
            match self.embedder.embed(texts) {
                Ok(vectors) if vectors.len() == texts.len() => return Ok(vectors),
                Ok(vectors) => {
                    last_error = format!(
                        "Model returned {} vectors for {} texts",
                        vectors.len(),
                        texts.len()
                    );
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt < self.max_retries.max(1) {
                let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                debug!(attempt, ?delay, "retrying embedding batch");
                tokio::time::sleep(delay).await;
            }
        }

        Err(KnowledgeError::EmbeddingBatch {
            attempts: self.max_retries.max(1),
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::knowledge::models::{content_hash, EntityId, EntityKind};

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(KnowledgeError::Embedding("transient".to_string()));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn item(name: &str, text: &str) -> (EntityId, String, String) {
        (
            EntityId::derive(EntityKind::Function, "a.py", name),
            content_hash(text),
            text.to_string(),
        )
    }

    fn pipeline(embedder: Arc<dyn Embedder>, retries: u32) -> EmbeddingPipeline {
        EmbeddingPipeline::new(embedder, 2, retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_identical_text_reuses_cached_vector() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail_first: 0,
        });
        // Batch size 1 so the first vector lands in the cache before the
        // second item is considered.
        let p = EmbeddingPipeline::new(embedder.clone(), 1, 1, Duration::from_millis(1));
        let items = vec![item("a", "same text"), item("b", "same text")];

        let outcome = p.embed_entities(&items).await;
        assert_eq!(outcome.embedded.len(), 2);
        assert_eq!(outcome.reused, 1);
        assert!(outcome.failed.is_empty());
        // Only the first occurrence hit the model.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });
        let p = pipeline(embedder, 3);
        let outcome = p.embed_entities(&[item("a", "text")]).await;
        assert_eq!(outcome.embedded.len(), 1);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_entities_failed() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
        });
        let p = pipeline(embedder, 2);
        let items = vec![item("a", "one"), item("b", "two")];
        let outcome = p.embed_entities(&items).await;
        assert!(outcome.embedded.is_empty());
        assert_eq!(outcome.failed.len(), 2);
    }
}
