//! Embedding generation for semantic search.

use std::path::PathBuf;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::error::KnowledgeError;

/// Trait for embedding generation.
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of text. Output order matches
    /// input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the model name, used as the default model-version tag.
    fn model_name(&self) -> &str;
}

/// FastEmbed-based embedder using the BGE-Small model by default.
pub struct FastEmbedder {
    model: TextEmbedding,
    dimension: usize,
    model_name: String,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("dimension", &self.dimension)
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

impl FastEmbedder {
    /// Create a new FastEmbed embedder with the default model.
    /// Uses `~/.patchgraph/cache/` as the model cache directory.
    pub fn new() -> Result<Self, KnowledgeError> {
        Self::with_model_and_cache(EmbeddingModel::BGESmallENV15, Self::default_cache_dir())
    }

    /// Resolve a configured model name to a fastembed model.
    pub fn from_config(model: &str, cache_dir: Option<PathBuf>) -> Result<Self, KnowledgeError> {
        let model = match model {
            "bge-small-en-v1.5" | "BGESmallENV15" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" | "BGEBaseENV15" => EmbeddingModel::BGEBaseENV15,
            "all-MiniLM-L6-v2" | "AllMiniLML6V2" => EmbeddingModel::AllMiniLML6V2,
            other => {
                return Err(KnowledgeError::Config(format!(
                    "Unknown embedding model: {}",
                    other
                )))
            }
        };
        Self::with_model_and_cache(model, cache_dir.unwrap_or_else(Self::default_cache_dir))
    }

    /// Create a new FastEmbed embedder with a specific model and cache directory.
    pub fn with_model_and_cache(
        model: EmbeddingModel,
        cache_dir: PathBuf,
    ) -> Result<Self, KnowledgeError> {
        let model_name = format!("{:?}", model);

        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            KnowledgeError::Embedding(format!("Failed to create cache directory: {}", e))
        })?;

        let text_embedding = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(true),
        )
        .map_err(|e| KnowledgeError::Embedding(e.to_string()))?;

        // The dimension comes from the model itself, never a constant.
        let test_result = text_embedding
            .embed(vec!["test"], None)
            .map_err(|e| KnowledgeError::Embedding(e.to_string()))?;
        let dimension = test_result
            .first()
            .map(|v| v.len())
            .ok_or_else(|| KnowledgeError::Embedding("Model returned no vectors".to_string()))?;

        Ok(Self {
            model: text_embedding,
            dimension,
            model_name,
        })
    }

    /// Default cache directory: `~/.patchgraph/cache/`
    fn default_cache_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".patchgraph")
            .join("cache")
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let texts_vec: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();

        self.model
            .embed(texts_vec, None)
            .map_err(|e| KnowledgeError::Embedding(e.to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_dimension() {
        // Requires downloading the model, so skip in CI.
        if std::env::var("CI").is_ok() {
            return;
        }

        let embedder = FastEmbedder::new().expect("Failed to create embedder");
        assert_eq!(embedder.dimension(), 384);
    }

    #[test]
    fn test_unknown_model_is_a_config_error() {
        let err = FastEmbedder::from_config("no-such-model", None).unwrap_err();
        assert!(matches!(err, KnowledgeError::Config(_)));
    }
}
