//! Hybrid query engine: vector seeding fused with bounded graph
//! expansion.
//!
//! Per query: embed the text, take the top vector hits as seeds, walk
//! the graph outward a bounded number of hops with a per-hop score
//! discount, then rank the union. A seed always outranks anything it
//! reached, because the discount is strictly below one.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::backend::{GraphBackend, VectorBackend};
use super::embedding::EmbeddingPipeline;
use super::error::KnowledgeError;
use super::models::{CodeEntity, EntityId, RelationKind};
use crate::config::QueryConfig;

/// One ranked entry in a query context.
#[derive(Debug, Clone)]
pub struct RetrievedEntity {
    pub entity: CodeEntity,
    /// Similarity score for seeds, discounted parent score for expanded
    /// entities.
    pub score: f32,
    /// Minimum hop distance from any seed; zero for seeds.
    pub hops: usize,
    pub is_seed: bool,
}

/// Ranked retrieval result. Ephemeral and caller-owned; nothing is
/// persisted per query.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub query: String,
    pub entries: Vec<RetrievedEntity>,
}

impl QueryContext {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn seed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_seed).count()
    }
}

/// Score and hop distance for a candidate during expansion.
#[derive(Debug, Clone, Copy)]
struct Placement {
    score: f32,
    hops: usize,
}

/// Fuses vector similarity with structural proximity.
pub struct HybridQueryEngine {
    graph: Arc<dyn GraphBackend>,
    vectors: Arc<dyn VectorBackend>,
    config: QueryConfig,
    model_version: String,
}

impl HybridQueryEngine {
    pub fn new(
        graph: Arc<dyn GraphBackend>,
        vectors: Arc<dyn VectorBackend>,
        config: QueryConfig,
        model_version: String,
    ) -> Self {
        Self {
            graph,
            vectors,
            config,
            model_version,
        }
    }

    /// Retrieve ranked context for a query.
    ///
    /// Returns an empty context when no seed clears the similarity
    /// threshold; backend failures surface as errors, never as
    /// silently-partial results.
    pub async fn retrieve(
        &self,
        query: &str,
        embedding: &EmbeddingPipeline,
    ) -> Result<QueryContext, KnowledgeError> {
        let query_vector = embedding.embed_query(query)?;

        // Seeding.
        let hits = self
            .vectors
            .search(&query_vector, self.config.top_k, &self.model_version)
            .await?;
        let seeds: Vec<(EntityId, f32)> = hits
            .into_iter()
            .filter(|h| h.score >= self.config.min_similarity)
            .map(|h| (h.entity_id, h.score))
            .collect();
        if seeds.is_empty() {
            debug!(query, "no seeds above similarity threshold");
            return Ok(QueryContext {
                query: query.to_string(),
                entries: Vec::new(),
            });
        }

        // Expansion.
        let placements = self.expand(&seeds).await?;

        // Ranking: score desc, then hops asc, then id asc.
        let mut ranked: Vec<(EntityId, Placement)> = placements.into_iter().collect();
        ranked.sort_by(|(id_a, a), (id_b, b)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.hops.cmp(&b.hops))
                .then_with(|| id_a.cmp(id_b))
        });
        ranked.truncate(self.config.entity_budget);

        // A ranked id must exist in the graph; a miss means the two
        // stores disagree and the caller needs to know.
        let ids: Vec<EntityId> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let mut nodes: BTreeMap<EntityId, CodeEntity> = self
            .graph
            .get_nodes(&ids)
            .await?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        let mut entries = Vec::with_capacity(ranked.len());
        for (id, placement) in ranked {
            let entity = nodes.remove(&id).ok_or_else(|| {
                KnowledgeError::BackendQuery(format!(
                    "Vector index references unknown entity {}",
                    id
                ))
            })?;
            entries.push(RetrievedEntity {
                entity,
                score: placement.score,
                hops: placement.hops,
                is_seed: placement.hops == 0,
            });
        }

        Ok(QueryContext {
            query: query.to_string(),
            entries,
        })
    }

    /// Breadth-first expansion from all seeds at once.
    ///
    /// Each entity keeps its best score and minimum hop distance; the
    /// visited map doubles as the cycle guard. The entity budget caps
    /// how many new entities a hop may add, preferring higher scores
    /// and breaking ties by id.
    async fn expand(
        &self,
        seeds: &[(EntityId, f32)],
    ) -> Result<BTreeMap<EntityId, Placement>, KnowledgeError> {
        let mut placements: BTreeMap<EntityId, Placement> = BTreeMap::new();
        for (id, score) in seeds {
            let entry = placements.entry(id.clone()).or_insert(Placement {
                score: *score,
                hops: 0,
            });
            if *score > entry.score {
                entry.score = *score;
            }
        }

        let mut frontier: Vec<EntityId> = placements.keys().cloned().collect();
        for hop in 1..=self.config.max_hops {
            if frontier.is_empty() || placements.len() >= self.config.entity_budget {
                break;
            }

            let edges = self
                .graph
                .neighbors(&frontier, &RelationKind::ALL)
                .await?;

            // Best reachable score per new candidate.
            let mut candidates: BTreeMap<EntityId, f32> = BTreeMap::new();
            for edge in edges {
                for (known, other) in [(&edge.from, &edge.to), (&edge.to, &edge.from)] {
                    let Some(parent) = placements.get(known) else {
                        continue;
                    };
                    if placements.contains_key(other) {
                        continue;
                    }
                    let score = parent.score * self.config.hop_decay;
                    let entry = candidates.entry(other.clone()).or_insert(score);
                    if score > *entry {
                        *entry = score;
                    }
                }
            }

            let mut ordered: Vec<(EntityId, f32)> = candidates.into_iter().collect();
            ordered.sort_by(|(id_a, a), (id_b, b)| {
                b.total_cmp(a).then_with(|| id_a.cmp(id_b))
            });

            frontier = Vec::new();
            for (id, score) in ordered {
                if placements.len() >= self.config.entity_budget {
                    break;
                }
                placements.insert(id.clone(), Placement { score, hops: hop });
                frontier.push(id);
            }
        }

        Ok(placements)
    }
}
