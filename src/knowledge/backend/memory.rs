//! In-memory backend for tests and ephemeral runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{GraphBackend, VectorBackend, VectorHit, VectorMetadata, WriteOutcome};
use crate::knowledge::error::KnowledgeError;
use crate::knowledge::models::{CodeEntity, EntityId, RelationKind, Relationship};

/// Backend holding the whole graph and vector index in process memory.
///
/// Implements the same contracts as the embedded database, which makes
/// it the reference implementation the integration tests run against.
#[derive(Default)]
pub struct MemoryBackend {
    nodes: RwLock<BTreeMap<EntityId, CodeEntity>>,
    edges: RwLock<BTreeSet<(EntityId, EntityId, RelationKind)>>,
    vectors: RwLock<BTreeMap<(EntityId, String), (Vec<f32>, VectorMetadata)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl GraphBackend for MemoryBackend {
    async fn initialize(&self) -> Result<(), KnowledgeError> {
        Ok(())
    }

    async fn upsert_node(&self, entity: &CodeEntity) -> Result<WriteOutcome, KnowledgeError> {
        let mut nodes = self.nodes.write().unwrap();
        match nodes.get(&entity.id) {
            Some(existing) if existing.content_hash == entity.content_hash && !existing.stale => {
                Ok(WriteOutcome::Unchanged)
            }
            Some(_) => {
                nodes.insert(entity.id.clone(), entity.clone());
                Ok(WriteOutcome::Updated)
            }
            None => {
                nodes.insert(entity.id.clone(), entity.clone());
                Ok(WriteOutcome::Created)
            }
        }
    }

    async fn upsert_edge(&self, rel: &Relationship) -> Result<bool, KnowledgeError> {
        let mut edges = self.edges.write().unwrap();
        Ok(edges.insert(rel.key()))
    }

    async fn get_nodes(&self, ids: &[EntityId]) -> Result<Vec<CodeEntity>, KnowledgeError> {
        let nodes = self.nodes.read().unwrap();
        Ok(ids.iter().filter_map(|id| nodes.get(id).cloned()).collect())
    }

    async fn list_node_ids(&self) -> Result<Vec<EntityId>, KnowledgeError> {
        let nodes = self.nodes.read().unwrap();
        Ok(nodes
            .values()
            .filter(|e| !e.stale)
            .map(|e| e.id.clone())
            .collect())
    }

    async fn neighbors(
        &self,
        ids: &[EntityId],
        kinds: &[RelationKind],
    ) -> Result<Vec<Relationship>, KnowledgeError> {
        let id_set: BTreeSet<&EntityId> = ids.iter().collect();
        let edges = self.edges.read().unwrap();
        Ok(edges
            .iter()
            .filter(|(from, to, kind)| {
                kinds.contains(kind) && (id_set.contains(from) || id_set.contains(to))
            })
            .map(|(from, to, kind)| Relationship::new(from.clone(), to.clone(), *kind))
            .collect())
    }

    async fn mark_stale(&self, ids: &[EntityId]) -> Result<usize, KnowledgeError> {
        let mut marked = 0;
        {
            let mut nodes = self.nodes.write().unwrap();
            for id in ids {
                if let Some(entity) = nodes.get_mut(id) {
                    if !entity.stale {
                        entity.stale = true;
                        marked += 1;
                    }
                }
            }
        }
        let id_set: BTreeSet<&EntityId> = ids.iter().collect();
        let mut edges = self.edges.write().unwrap();
        edges.retain(|(from, to, _)| !id_set.contains(from) && !id_set.contains(to));
        Ok(marked)
    }

    async fn node_count(&self) -> Result<usize, KnowledgeError> {
        let nodes = self.nodes.read().unwrap();
        Ok(nodes.values().filter(|e| !e.stale).count())
    }

    async fn edge_count(&self) -> Result<usize, KnowledgeError> {
        Ok(self.edges.read().unwrap().len())
    }

    async fn clear(&self) -> Result<(), KnowledgeError> {
        self.nodes.write().unwrap().clear();
        self.edges.write().unwrap().clear();
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn initialize(&self, _dimension: usize) -> Result<(), KnowledgeError> {
        Ok(())
    }

    async fn upsert_vector(
        &self,
        id: &EntityId,
        vector: &[f32],
        metadata: &VectorMetadata,
        model_version: &str,
    ) -> Result<(), KnowledgeError> {
        let mut vectors = self.vectors.write().unwrap();
        vectors.insert(
            (id.clone(), model_version.to_string()),
            (vector.to_vec(), metadata.clone()),
        );
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        model_version: &str,
    ) -> Result<Vec<VectorHit>, KnowledgeError> {
        let vectors = self.vectors.read().unwrap();
        let mut hits: Vec<VectorHit> = vectors
            .iter()
            .filter(|((_, version), _)| version == model_version)
            .map(|((id, _), (stored, _))| VectorHit {
                entity_id: id.clone(),
                score: Self::cosine(vector, stored),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn list_vector_ids(&self, model_version: &str) -> Result<Vec<EntityId>, KnowledgeError> {
        let vectors = self.vectors.read().unwrap();
        Ok(vectors
            .keys()
            .filter(|(_, version)| version == model_version)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn remove_vectors(&self, ids: &[EntityId]) -> Result<usize, KnowledgeError> {
        let id_set: BTreeSet<&EntityId> = ids.iter().collect();
        let mut vectors = self.vectors.write().unwrap();
        let before = vectors.len();
        vectors.retain(|(id, _), _| !id_set.contains(id));
        Ok(before - vectors.len())
    }

    async fn vector_count(&self, model_version: &str) -> Result<usize, KnowledgeError> {
        let vectors = self.vectors.read().unwrap();
        Ok(vectors
            .keys()
            .filter(|(_, version)| version == model_version)
            .count())
    }

    async fn clear(&self) -> Result<(), KnowledgeError> {
        self.vectors.write().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::models::EntityKind;

    fn entity(name: &str, source: &str) -> CodeEntity {
        CodeEntity::new(
            EntityKind::Function,
            "a.py",
            name,
            "python",
            (0, source.len()),
            (1, 1),
            source,
        )
    }

    #[tokio::test]
    async fn test_upsert_node_reports_outcome() {
        let backend = MemoryBackend::new();
        let e = entity("f", "def f(): pass");
        assert_eq!(backend.upsert_node(&e).await.unwrap(), WriteOutcome::Created);
        assert_eq!(backend.upsert_node(&e).await.unwrap(), WriteOutcome::Unchanged);

        let changed = entity("f", "def f(): return 1");
        assert_eq!(
            backend.upsert_node(&changed).await.unwrap(),
            WriteOutcome::Updated
        );
    }

    #[tokio::test]
    async fn test_upsert_edge_is_create_if_absent() {
        let backend = MemoryBackend::new();
        let a = entity("a", "def a(): pass");
        let b = entity("b", "def b(): pass");
        let rel = Relationship::new(a.id.clone(), b.id.clone(), RelationKind::Calls);
        assert!(backend.upsert_edge(&rel).await.unwrap());
        assert!(!backend.upsert_edge(&rel).await.unwrap());
        assert_eq!(backend.edge_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_stale_detaches_edges() {
        let backend = MemoryBackend::new();
        let a = entity("a", "def a(): pass");
        let b = entity("b", "def b(): pass");
        backend.upsert_node(&a).await.unwrap();
        backend.upsert_node(&b).await.unwrap();
        backend
            .upsert_edge(&Relationship::new(
                a.id.clone(),
                b.id.clone(),
                RelationKind::Calls,
            ))
            .await
            .unwrap();

        let marked = backend.mark_stale(&[b.id.clone()]).await.unwrap();
        assert_eq!(marked, 1);
        assert_eq!(backend.edge_count().await.unwrap(), 0);
        assert_eq!(backend.node_count().await.unwrap(), 1);
        // Re-upserting the same content revives the node as an update.
        assert_eq!(backend.upsert_node(&b).await.unwrap(), WriteOutcome::Updated);
        assert_eq!(backend.node_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_search_filters_by_model_version() {
        let backend = MemoryBackend::new();
        let a = entity("a", "def a(): pass");
        let meta = VectorMetadata {
            path: "a.py".to_string(),
            kind: EntityKind::Function,
            name: "a".to_string(),
        };
        backend
            .upsert_vector(&a.id, &[1.0, 0.0], &meta, "v1")
            .await
            .unwrap();
        backend
            .upsert_vector(&a.id, &[0.0, 1.0], &meta, "v2")
            .await
            .unwrap();

        let hits = backend.search(&[1.0, 0.0], 10, "v1").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.99);
        assert_eq!(backend.vector_count("v2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_is_deterministic_on_ties() {
        let backend = MemoryBackend::new();
        let a = entity("a", "def a(): pass");
        let b = entity("b", "def b(): pass");
        let meta = VectorMetadata {
            path: "a.py".to_string(),
            kind: EntityKind::Function,
            name: "x".to_string(),
        };
        backend.upsert_vector(&a.id, &[1.0, 0.0], &meta, "v1").await.unwrap();
        backend.upsert_vector(&b.id, &[1.0, 0.0], &meta, "v1").await.unwrap();

        let first = backend.search(&[1.0, 0.0], 2, "v1").await.unwrap();
        let second = backend.search(&[1.0, 0.0], 2, "v1").await.unwrap();
        let order: Vec<_> = first.iter().map(|h| h.entity_id.clone()).collect();
        let order2: Vec<_> = second.iter().map(|h| h.entity_id.clone()).collect();
        assert_eq!(order, order2);
        // Equal scores fall back to id order.
        assert!(order[0] < order[1]);
    }
}
