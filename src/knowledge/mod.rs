//! The knowledge base: a structural graph and a vector index over one
//! repository snapshot, built by ingestion and fused at query time.

pub mod backend;
pub mod embedder;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod parser;
pub mod query;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use backend::{GraphBackend, SurrealBackend, VectorBackend};
use embedder::{Embedder, FastEmbedder};
use embedding::EmbeddingPipeline;
use ingest::IngestPipeline;
use query::{HybridQueryEngine, QueryContext};

use crate::config::Config;
use crate::context::{ContextAssembler, ContextPayload};

pub use error::KnowledgeError;
pub use models::{CodeEntity, EntityId, EntityKind, IngestReport, RelationKind, Relationship};

/// Index size summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnowledgeStats {
    pub nodes: usize,
    pub edges: usize,
    pub vectors: usize,
}

/// Facade over ingestion, retrieval, and context assembly.
pub struct KnowledgeBase {
    graph: Arc<dyn GraphBackend>,
    vectors: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    config: Config,
    model_version: String,
}

impl KnowledgeBase {
    /// Open an embedded database and the configured embedding model.
    pub async fn open(db_path: &Path, config: Config) -> Result<Self, KnowledgeError> {
        let backend = Arc::new(SurrealBackend::open(db_path).await?);
        let embedder: Arc<dyn Embedder> = Arc::new(FastEmbedder::from_config(
            &config.embedding.model,
            config.embedding.cache_dir.clone(),
        )?);
        let graph: Arc<dyn GraphBackend> = backend.clone();
        let vectors: Arc<dyn VectorBackend> = backend;
        Ok(Self::with_backends(graph, vectors, embedder, config))
    }

    /// Assemble a knowledge base from explicit backends. Used by tests
    /// and callers with their own storage or models.
    pub fn with_backends(
        graph: Arc<dyn GraphBackend>,
        vectors: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        config: Config,
    ) -> Self {
        let model_version = config
            .embedding
            .model_version
            .clone()
            .unwrap_or_else(|| embedder.model_name().to_string());
        Self {
            graph,
            vectors,
            embedder,
            config,
            model_version,
        }
    }

    /// Prepare backend schemas. The vector schema is sized from the
    /// embedding model's dimension.
    pub async fn initialize(&self) -> Result<(), KnowledgeError> {
        self.graph.initialize().await?;
        self.vectors.initialize(self.embedder.dimension()).await?;
        Ok(())
    }

    /// Version tag written with every vector.
    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Ingest the snapshot rooted at `root`.
    pub async fn ingest(&self, root: &Path) -> Result<IngestReport, KnowledgeError> {
        let pipeline = IngestPipeline::new(
            self.graph.clone(),
            self.vectors.clone(),
            self.embedder.clone(),
            self.config.ingest.clone(),
            self.model_version.clone(),
        );
        pipeline.run(root).await
    }

    /// Retrieve ranked context for a query.
    pub async fn retrieve(&self, query: &str) -> Result<QueryContext, KnowledgeError> {
        let engine = HybridQueryEngine::new(
            self.graph.clone(),
            self.vectors.clone(),
            self.config.query.clone(),
            self.model_version.clone(),
        );
        engine.retrieve(query, &self.query_embedding()).await
    }

    /// Retrieve and assemble in one step.
    pub async fn retrieve_context(&self, query: &str) -> Result<ContextPayload, KnowledgeError> {
        let context = self.retrieve(query).await?;
        let assembler = ContextAssembler::new(self.config.context.token_budget);
        Ok(assembler.assemble(&context))
    }

    /// Drop all graph and vector data, e.g. between dataset entries.
    pub async fn clear(&self) -> Result<(), KnowledgeError> {
        GraphBackend::clear(&*self.graph).await?;
        VectorBackend::clear(&*self.vectors).await?;
        Ok(())
    }

    /// Current index sizes.
    pub async fn stats(&self) -> Result<KnowledgeStats, KnowledgeError> {
        Ok(KnowledgeStats {
            nodes: self.graph.node_count().await?,
            edges: self.graph.edge_count().await?,
            vectors: self.vectors.vector_count(&self.model_version).await?,
        })
    }

    fn query_embedding(&self) -> EmbeddingPipeline {
        EmbeddingPipeline::new(
            self.embedder.clone(),
            self.config.ingest.batch_size,
            self.config.ingest.max_retries,
            Duration::from_millis(self.config.ingest.retry_base_delay_ms),
        )
    }
}
