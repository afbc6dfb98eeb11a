//! Storage backends: graph and vector primitives behind async traits.
//!
//! The embedded SurrealDB backend serves both roles for real runs; the
//! in-memory backend covers tests and ephemeral pipelines.

mod memory;
mod surreal;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::KnowledgeError;
use super::models::{CodeEntity, EntityId, EntityKind, RelationKind, Relationship};

pub use memory::MemoryBackend;
pub use surreal::SurrealBackend;

/// What a node upsert actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// Stored content hash matched; nothing was written.
    Unchanged,
}

/// A similarity search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub entity_id: EntityId,
    pub score: f32,
}

/// Display metadata stored next to a vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub path: String,
    pub kind: EntityKind,
    pub name: String,
}

/// Graph-side storage primitives.
///
/// Implementations must keep writes idempotent: upserting an unchanged
/// node is a no-op and edge creation is create-if-absent on the
/// `(from, to, kind)` triple.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Prepare schema. Safe to call repeatedly.
    async fn initialize(&self) -> Result<(), KnowledgeError>;

    /// Insert or update a node, comparing content hashes to detect
    /// unchanged entities.
    async fn upsert_node(&self, entity: &CodeEntity) -> Result<WriteOutcome, KnowledgeError>;

    /// Create an edge if the `(from, to, kind)` triple does not already
    /// exist. Returns true when an edge was created.
    async fn upsert_edge(&self, rel: &Relationship) -> Result<bool, KnowledgeError>;

    /// Fetch nodes by id. Missing ids are absent from the result.
    async fn get_nodes(&self, ids: &[EntityId]) -> Result<Vec<CodeEntity>, KnowledgeError>;

    /// Ids of all non-stale nodes.
    async fn list_node_ids(&self) -> Result<Vec<EntityId>, KnowledgeError>;

    /// One-hop adjacency in both directions, filtered by edge kind.
    async fn neighbors(
        &self,
        ids: &[EntityId],
        kinds: &[RelationKind],
    ) -> Result<Vec<Relationship>, KnowledgeError>;

    /// Flag nodes stale and detach all of their incident edges.
    /// Returns how many nodes were flagged.
    async fn mark_stale(&self, ids: &[EntityId]) -> Result<usize, KnowledgeError>;

    /// Non-stale node count.
    async fn node_count(&self) -> Result<usize, KnowledgeError>;

    /// Edge count.
    async fn edge_count(&self) -> Result<usize, KnowledgeError>;

    /// Drop all graph data.
    async fn clear(&self) -> Result<(), KnowledgeError>;
}

/// Vector-side storage primitives.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Prepare schema for vectors of the given dimension. Safe to call
    /// repeatedly with the same dimension.
    async fn initialize(&self, dimension: usize) -> Result<(), KnowledgeError>;

    /// Write a vector keyed by `(entity id, model version)`; a later
    /// write for the same key overwrites.
    async fn upsert_vector(
        &self,
        id: &EntityId,
        vector: &[f32],
        metadata: &VectorMetadata,
        model_version: &str,
    ) -> Result<(), KnowledgeError>;

    /// K-nearest search by cosine similarity among vectors tagged with
    /// the given model version. Results ordered by score descending,
    /// ties broken by entity id.
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        model_version: &str,
    ) -> Result<Vec<VectorHit>, KnowledgeError>;

    /// Ids of all entities holding a vector under the given model
    /// version.
    async fn list_vector_ids(&self, model_version: &str) -> Result<Vec<EntityId>, KnowledgeError>;

    /// Remove all vectors (any model version) for the given entities.
    /// Returns how many records were removed.
    async fn remove_vectors(&self, ids: &[EntityId]) -> Result<usize, KnowledgeError>;

    /// Number of vectors stored for the given model version.
    async fn vector_count(&self, model_version: &str) -> Result<usize, KnowledgeError>;

    /// Drop all vector data.
    async fn clear(&self) -> Result<(), KnowledgeError>;
}
