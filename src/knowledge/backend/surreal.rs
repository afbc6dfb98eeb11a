//! Embedded SurrealDB backend: graph tables plus an HNSW vector index.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::local::{Db, RocksDb};
use surrealdb::Surreal;

use super::{GraphBackend, VectorBackend, VectorHit, VectorMetadata, WriteOutcome};
use crate::knowledge::error::KnowledgeError;
use crate::knowledge::models::{CodeEntity, EntityId, EntityKind, RelationKind, Relationship};

/// Graph and vector storage in a single embedded SurrealDB instance.
pub struct SurrealBackend {
    db: Surreal<Db>,
}

/// Stored entity row. `entity_id` is a plain field so it survives the
/// round trip untouched; the record key mirrors it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityRow {
    entity_id: EntityId,
    kind: EntityKind,
    path: String,
    qualified_name: String,
    language: String,
    start_byte: usize,
    end_byte: usize,
    start_line: u32,
    end_line: u32,
    source: String,
    doc_comment: Option<String>,
    content_hash: String,
    stale: bool,
    indexed_at: String,
}

impl From<&CodeEntity> for EntityRow {
    fn from(e: &CodeEntity) -> Self {
        Self {
            entity_id: e.id.clone(),
            kind: e.kind,
            path: e.path.clone(),
            qualified_name: e.qualified_name.clone(),
            language: e.language.clone(),
            start_byte: e.start_byte,
            end_byte: e.end_byte,
            start_line: e.start_line,
            end_line: e.end_line,
            source: e.source.clone(),
            doc_comment: e.doc_comment.clone(),
            content_hash: e.content_hash.clone(),
            stale: e.stale,
            indexed_at: e.indexed_at.to_rfc3339(),
        }
    }
}

impl TryFrom<EntityRow> for CodeEntity {
    type Error = KnowledgeError;

    fn try_from(row: EntityRow) -> Result<Self, KnowledgeError> {
        let indexed_at = chrono::DateTime::parse_from_rfc3339(&row.indexed_at)
            .map_err(|e| KnowledgeError::BackendQuery(format!("Bad timestamp: {}", e)))?
            .with_timezone(&chrono::Utc);
        Ok(CodeEntity {
            id: row.entity_id,
            kind: row.kind,
            path: row.path,
            qualified_name: row.qualified_name,
            language: row.language,
            start_byte: row.start_byte,
            end_byte: row.end_byte,
            start_line: row.start_line,
            end_line: row.end_line,
            source: row.source,
            doc_comment: row.doc_comment,
            content_hash: row.content_hash,
            stale: row.stale,
            indexed_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeRow {
    from_id: EntityId,
    to_id: EntityId,
    kind: RelationKind,
}

#[derive(Debug, Serialize)]
struct EmbeddingRow {
    entity_id: EntityId,
    vector: Vec<f32>,
    path: String,
    kind: EntityKind,
    name: String,
    model_version: String,
}

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}

fn write_err(e: surrealdb::Error) -> KnowledgeError {
    KnowledgeError::BackendWrite(e.to_string())
}

fn query_err(e: surrealdb::Error) -> KnowledgeError {
    KnowledgeError::BackendQuery(e.to_string())
}

impl SurrealBackend {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, KnowledgeError> {
        let db = Surreal::new::<RocksDb>(path).await.map_err(write_err)?;
        db.use_ns("patchgraph")
            .use_db("knowledge")
            .await
            .map_err(write_err)?;
        Ok(Self { db })
    }

    async fn count_query(&self, query: &str) -> Result<usize, KnowledgeError> {
        let result: Option<CountResult> = self
            .db
            .query(query)
            .await
            .map_err(query_err)?
            .take(0)
            .map_err(query_err)?;
        Ok(result.map(|r| r.count as usize).unwrap_or(0))
    }

    fn id_strings(ids: &[EntityId]) -> Vec<String> {
        ids.iter().map(|id| id.as_str().to_string()).collect()
    }

    fn kind_strings(kinds: &[RelationKind]) -> Vec<String> {
        kinds.iter().map(|k| k.as_str().to_string()).collect()
    }
}

#[async_trait]
impl GraphBackend for SurrealBackend {
    async fn initialize(&self) -> Result<(), KnowledgeError> {
        self.db
            .query(
                r#"
                DEFINE TABLE IF NOT EXISTS entity SCHEMAFULL;
                DEFINE FIELD IF NOT EXISTS entity_id ON entity TYPE string;
                DEFINE FIELD IF NOT EXISTS kind ON entity TYPE string;
                DEFINE FIELD IF NOT EXISTS path ON entity TYPE string;
                DEFINE FIELD IF NOT EXISTS qualified_name ON entity TYPE string;
                DEFINE FIELD IF NOT EXISTS language ON entity TYPE string;
                DEFINE FIELD IF NOT EXISTS start_byte ON entity TYPE int;
                DEFINE FIELD IF NOT EXISTS end_byte ON entity TYPE int;
                DEFINE FIELD IF NOT EXISTS start_line ON entity TYPE int;
                DEFINE FIELD IF NOT EXISTS end_line ON entity TYPE int;
                DEFINE FIELD IF NOT EXISTS source ON entity TYPE string;
                DEFINE FIELD IF NOT EXISTS doc_comment ON entity TYPE option<string>;
                DEFINE FIELD IF NOT EXISTS content_hash ON entity TYPE string;
                DEFINE FIELD IF NOT EXISTS stale ON entity TYPE bool;
                DEFINE FIELD IF NOT EXISTS indexed_at ON entity TYPE string;
                DEFINE INDEX IF NOT EXISTS entity_id_idx ON entity FIELDS entity_id UNIQUE;
                DEFINE INDEX IF NOT EXISTS entity_path_idx ON entity FIELDS path;
                "#,
            )
            .await
            .map_err(write_err)?;

        self.db
            .query(
                r#"
                DEFINE TABLE IF NOT EXISTS relationship SCHEMAFULL;
                DEFINE FIELD IF NOT EXISTS from_id ON relationship TYPE string;
                DEFINE FIELD IF NOT EXISTS to_id ON relationship TYPE string;
                DEFINE FIELD IF NOT EXISTS kind ON relationship TYPE string;
                DEFINE INDEX IF NOT EXISTS rel_triple ON relationship FIELDS from_id, to_id, kind UNIQUE;
                DEFINE INDEX IF NOT EXISTS rel_from ON relationship FIELDS from_id;
                DEFINE INDEX IF NOT EXISTS rel_to ON relationship FIELDS to_id;
                "#,
            )
            .await
            .map_err(write_err)?;

        Ok(())
    }

    async fn upsert_node(&self, entity: &CodeEntity) -> Result<WriteOutcome, KnowledgeError> {
        let existing: Option<EntityRow> = self
            .db
            .query("SELECT * FROM entity WHERE entity_id = $id LIMIT 1")
            .bind(("id", entity.id.as_str().to_string()))
            .await
            .map_err(query_err)?
            .take(0)
            .map_err(query_err)?;

        let outcome = match &existing {
            Some(row) if row.content_hash == entity.content_hash && !row.stale => {
                return Ok(WriteOutcome::Unchanged);
            }
            Some(_) => WriteOutcome::Updated,
            None => WriteOutcome::Created,
        };

        let _: Option<EntityRow> = self
            .db
            .upsert(("entity", entity.id.as_str()))
            .content(EntityRow::from(entity))
            .await
            .map_err(write_err)?;
        Ok(outcome)
    }

    async fn upsert_edge(&self, rel: &Relationship) -> Result<bool, KnowledgeError> {
        let existing: Option<EdgeRow> = self
            .db
            .query(
                "SELECT * FROM relationship WHERE from_id = $from AND to_id = $to AND kind = $kind LIMIT 1",
            )
            .bind(("from", rel.from.as_str().to_string()))
            .bind(("to", rel.to.as_str().to_string()))
            .bind(("kind", rel.kind.as_str().to_string()))
            .await
            .map_err(query_err)?
            .take(0)
            .map_err(query_err)?;

        if existing.is_some() {
            return Ok(false);
        }

        let _: Option<EdgeRow> = self
            .db
            .create("relationship")
            .content(EdgeRow {
                from_id: rel.from.clone(),
                to_id: rel.to.clone(),
                kind: rel.kind,
            })
            .await
            .map_err(write_err)?;
        Ok(true)
    }

    async fn get_nodes(&self, ids: &[EntityId]) -> Result<Vec<CodeEntity>, KnowledgeError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<EntityRow> = self
            .db
            .query("SELECT * FROM entity WHERE entity_id IN $ids")
            .bind(("ids", Self::id_strings(ids)))
            .await
            .map_err(query_err)?
            .take(0)
            .map_err(query_err)?;
        rows.into_iter().map(CodeEntity::try_from).collect()
    }

    async fn list_node_ids(&self) -> Result<Vec<EntityId>, KnowledgeError> {
        #[derive(Deserialize)]
        struct IdRow {
            entity_id: EntityId,
        }
        let rows: Vec<IdRow> = self
            .db
            .query("SELECT entity_id FROM entity WHERE stale = false")
            .await
            .map_err(query_err)?
            .take(0)
            .map_err(query_err)?;
        Ok(rows.into_iter().map(|r| r.entity_id).collect())
    }

    async fn neighbors(
        &self,
        ids: &[EntityId],
        kinds: &[RelationKind],
    ) -> Result<Vec<Relationship>, KnowledgeError> {
        if ids.is_empty() || kinds.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<EdgeRow> = self
            .db
            .query(
                "SELECT * FROM relationship WHERE (from_id IN $ids OR to_id IN $ids) AND kind IN $kinds",
            )
            .bind(("ids", Self::id_strings(ids)))
            .bind(("kinds", Self::kind_strings(kinds)))
            .await
            .map_err(query_err)?
            .take(0)
            .map_err(query_err)?;
        Ok(rows
            .into_iter()
            .map(|r| Relationship::new(r.from_id, r.to_id, r.kind))
            .collect())
    }

    async fn mark_stale(&self, ids: &[EntityId]) -> Result<usize, KnowledgeError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let id_strings = Self::id_strings(ids);

        let updated: Vec<EntityRow> = self
            .db
            .query("UPDATE entity SET stale = true WHERE entity_id IN $ids AND stale = false RETURN AFTER")
            .bind(("ids", id_strings.clone()))
            .await
            .map_err(write_err)?
            .take(0)
            .map_err(write_err)?;

        // Detaching edges is part of the same logical operation.
        self.db
            .query("DELETE relationship WHERE from_id IN $ids OR to_id IN $ids")
            .bind(("ids", id_strings))
            .await
            .map_err(write_err)?;

        Ok(updated.len())
    }

    async fn node_count(&self) -> Result<usize, KnowledgeError> {
        self.count_query("SELECT count() FROM entity WHERE stale = false GROUP ALL")
            .await
    }

    async fn edge_count(&self) -> Result<usize, KnowledgeError> {
        self.count_query("SELECT count() FROM relationship GROUP ALL")
            .await
    }

    async fn clear(&self) -> Result<(), KnowledgeError> {
        self.db.query("DELETE entity").await.map_err(write_err)?;
        self.db
            .query("DELETE relationship")
            .await
            .map_err(write_err)?;
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for SurrealBackend {
    async fn initialize(&self, dimension: usize) -> Result<(), KnowledgeError> {
        self.db
            .query(
                r#"
                DEFINE TABLE IF NOT EXISTS embedding SCHEMAFULL;
                DEFINE FIELD IF NOT EXISTS entity_id ON embedding TYPE string;
                DEFINE FIELD IF NOT EXISTS vector ON embedding TYPE array<float>;
                DEFINE FIELD IF NOT EXISTS path ON embedding TYPE string;
                DEFINE FIELD IF NOT EXISTS kind ON embedding TYPE string;
                DEFINE FIELD IF NOT EXISTS name ON embedding TYPE string;
                DEFINE FIELD IF NOT EXISTS model_version ON embedding TYPE string;
                DEFINE INDEX IF NOT EXISTS emb_key ON embedding FIELDS entity_id, model_version UNIQUE;
                "#,
            )
            .await
            .map_err(write_err)?;

        // The index dimension follows the active model, never a
        // constant. OVERWRITE so switching to a model with a different
        // dimension redefines the index instead of leaving a stale one.
        self.db
            .query(format!(
                "DEFINE INDEX OVERWRITE emb_vector ON embedding FIELDS vector HNSW DIMENSION {} DIST COSINE",
                dimension
            ))
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn upsert_vector(
        &self,
        id: &EntityId,
        vector: &[f32],
        metadata: &VectorMetadata,
        model_version: &str,
    ) -> Result<(), KnowledgeError> {
        self.db
            .query("DELETE embedding WHERE entity_id = $id AND model_version = $version")
            .bind(("id", id.as_str().to_string()))
            .bind(("version", model_version.to_string()))
            .await
            .map_err(write_err)?;

        let _: Option<serde_json::Value> = self
            .db
            .create("embedding")
            .content(EmbeddingRow {
                entity_id: id.clone(),
                vector: vector.to_vec(),
                path: metadata.path.clone(),
                kind: metadata.kind,
                name: metadata.name.clone(),
                model_version: model_version.to_string(),
            })
            .await
            .map_err(write_err)?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        model_version: &str,
    ) -> Result<Vec<VectorHit>, KnowledgeError> {
        #[derive(Deserialize)]
        struct HitRow {
            entity_id: EntityId,
            score: f32,
        }

        // K must be a literal in the HNSW operator.
        let query = format!(
            r#"
            SELECT
                entity_id,
                vector::similarity::cosine(vector, $query) AS score
            FROM embedding
            WHERE vector <|{},COSINE|> $query AND model_version = $version
            ORDER BY score DESC
            "#,
            k
        );

        let rows: Vec<HitRow> = self
            .db
            .query(&query)
            .bind(("query", vector.to_vec()))
            .bind(("version", model_version.to_string()))
            .await
            .map_err(query_err)?
            .take(0)
            .map_err(query_err)?;

        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .map(|r| VectorHit {
                entity_id: r.entity_id,
                score: r.score,
            })
            .collect();
        // Stable tie order regardless of index internals.
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn list_vector_ids(&self, model_version: &str) -> Result<Vec<EntityId>, KnowledgeError> {
        #[derive(Deserialize)]
        struct IdRow {
            entity_id: EntityId,
        }
        let rows: Vec<IdRow> = self
            .db
            .query("SELECT entity_id FROM embedding WHERE model_version = $version")
            .bind(("version", model_version.to_string()))
            .await
            .map_err(query_err)?
            .take(0)
            .map_err(query_err)?;
        Ok(rows.into_iter().map(|r| r.entity_id).collect())
    }

    async fn remove_vectors(&self, ids: &[EntityId]) -> Result<usize, KnowledgeError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let removed: Vec<serde_json::Value> = self
            .db
            .query("DELETE embedding WHERE entity_id IN $ids RETURN BEFORE")
            .bind(("ids", Self::id_strings(ids)))
            .await
            .map_err(write_err)?
            .take(0)
            .map_err(write_err)?;
        Ok(removed.len())
    }

    async fn vector_count(&self, model_version: &str) -> Result<usize, KnowledgeError> {
        let result: Option<CountResult> = self
            .db
            .query("SELECT count() FROM embedding WHERE model_version = $version GROUP ALL")
            .bind(("version", model_version.to_string()))
            .await
            .map_err(query_err)?
            .take(0)
            .map_err(query_err)?;
        Ok(result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn clear(&self) -> Result<(), KnowledgeError> {
        self.db.query("DELETE embedding").await.map_err(write_err)?;
        Ok(())
    }
}
