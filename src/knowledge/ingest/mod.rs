//! Ingestion pipeline: walk a repository snapshot, parse it, write the
//! graph, and index embeddings.
//!
//! The pipeline is idempotent: running it twice over an unchanged
//! snapshot performs zero writes. Nodes are always written before the
//! edges that reference them, and unresolved relation targets are
//! counted and skipped rather than written as dangling edges.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use super::backend::{GraphBackend, VectorBackend, VectorMetadata, WriteOutcome};
use super::embedder::Embedder;
use super::embedding::EmbeddingPipeline;
use super::error::KnowledgeError;
use super::models::{
    CodeEntity, EntityId, EntityKind, IngestReport, RelationKind, Relationship, SkippedFile,
};
use super::parser::{ParserRegistry, PendingRelation};
use crate::config::IngestConfig;

/// Symbol tables built over one parsed snapshot, used to resolve
/// pending relations into concrete entity ids.
struct SymbolTable {
    /// Qualified name (`Class.method`, `helper_total`) to entity id.
    /// First occurrence wins; files are visited in sorted order, so the
    /// choice is deterministic.
    by_qualified: HashMap<String, EntityId>,
    /// Bare trailing name (`method`) to entity id, first wins.
    by_bare: HashMap<String, EntityId>,
    /// File path to file entity id.
    file_by_path: BTreeMap<String, EntityId>,
}

impl SymbolTable {
    fn build(entities: &BTreeMap<EntityId, CodeEntity>) -> Self {
        let mut by_qualified = HashMap::new();
        let mut by_bare = HashMap::new();
        let mut file_by_path = BTreeMap::new();

        for entity in entities.values() {
            match entity.kind {
                EntityKind::File => {
                    file_by_path.insert(entity.path.clone(), entity.id.clone());
                }
                _ => {
                    by_qualified
                        .entry(entity.qualified_name.clone())
                        .or_insert_with(|| entity.id.clone());
                    let bare = entity
                        .qualified_name
                        .rsplit(['.', ':'])
                        .next()
                        .unwrap_or(&entity.qualified_name);
                    by_bare
                        .entry(bare.to_string())
                        .or_insert_with(|| entity.id.clone());
                }
            }
        }

        Self {
            by_qualified,
            by_bare,
            file_by_path,
        }
    }

    /// Resolve a pending relation target to an entity id.
    fn resolve(&self, pending: &PendingRelation) -> Option<EntityId> {
        match pending.kind {
            RelationKind::Imports => self.resolve_module(&pending.target),
            RelationKind::Calls => self
                .by_qualified
                .get(&pending.target)
                .or_else(|| {
                    let bare = pending
                        .target
                        .rsplit(['.', ':'])
                        .next()
                        .unwrap_or(&pending.target);
                    self.by_bare.get(bare)
                })
                .cloned(),
            // Inherits and References resolve strictly by name.
            _ => self.by_qualified.get(&pending.target).cloned(),
        }
    }

    /// Map a dotted module path (`pkg.helpers`) onto an indexed file
    /// (`pkg/helpers.py` or `pkg/helpers/__init__.py`).
    fn resolve_module(&self, module: &str) -> Option<EntityId> {
        let base = module.replace('.', "/");
        let candidates = [format!("{}.py", base), format!("{}/__init__.py", base)];

        for candidate in &candidates {
            if let Some(id) = self.file_by_path.get(candidate) {
                return Some(id.clone());
            }
        }
        // Fall back to a suffix match so imports resolve regardless of
        // where the snapshot root sits in the package hierarchy.
        for candidate in &candidates {
            let suffix = format!("/{}", candidate);
            if let Some((_, id)) = self
                .file_by_path
                .iter()
                .find(|(path, _)| path.ends_with(&suffix))
            {
                return Some(id.clone());
            }
        }
        None
    }
}

/// Builds the knowledge base from a repository snapshot.
pub struct IngestPipeline {
    graph: Arc<dyn GraphBackend>,
    vectors: Arc<dyn VectorBackend>,
    registry: ParserRegistry,
    embedding: EmbeddingPipeline,
    config: IngestConfig,
    model_version: String,
}

impl IngestPipeline {
    pub fn new(
        graph: Arc<dyn GraphBackend>,
        vectors: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        config: IngestConfig,
        model_version: String,
    ) -> Self {
        let embedding = EmbeddingPipeline::new(
            embedder,
            config.batch_size,
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
        );
        Self {
            graph,
            vectors,
            registry: ParserRegistry::new(),
            embedding,
            config,
            model_version,
        }
    }

    /// Ingest the snapshot rooted at `root`.
    pub async fn run(&self, root: &Path) -> Result<IngestReport, KnowledgeError> {
        let mut report = IngestReport::default();

        let previous_ids: BTreeSet<EntityId> =
            self.graph.list_node_ids().await?.into_iter().collect();

        let files = self.collect_files(root, &mut report);
        info!(files = files.len(), root = %root.display(), "ingesting snapshot");

        // Parse every file; failures are recorded and skipped.
        let mut entities: BTreeMap<EntityId, CodeEntity> = BTreeMap::new();
        let mut resolved: Vec<Relationship> = Vec::new();
        let mut pending: Vec<PendingRelation> = Vec::new();

        for relative in &files {
            let full_path = root.join(relative);
            let content = match std::fs::read_to_string(&full_path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %relative, error = %e, "skipping unreadable file");
                    report.files_skipped.push(SkippedFile {
                        path: relative.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let Some(parser) = self.registry.parser_for_path(relative) else {
                continue;
            };
            match parser.parse_file(relative, &content) {
                Ok(result) => {
                    report.files_parsed += 1;
                    for warning in &result.warnings {
                        warn!(path = %relative, warning, "parser warning");
                    }
                    for entity in result.entities {
                        self.check_collision(&entities, &entity)?;
                        entities.entry(entity.id.clone()).or_insert(entity);
                    }
                    resolved.extend(result.relationships);
                    pending.extend(result.pending);
                }
                Err(message) => {
                    warn!(path = %relative, error = %message, "skipping unparseable file");
                    report.files_skipped.push(SkippedFile {
                        path: relative.clone(),
                        reason: message,
                    });
                }
            }
        }

        // Resolve pending relations against the run-wide symbol table.
        let symbols = SymbolTable::build(&entities);
        let mut edges: BTreeSet<(EntityId, EntityId, RelationKind)> = resolved
            .iter()
            .filter(|r| entities.contains_key(&r.from) && entities.contains_key(&r.to))
            .map(Relationship::key)
            .collect();
        for p in &pending {
            match symbols.resolve(p) {
                Some(to) if entities.contains_key(&p.from) => {
                    edges.insert((p.from.clone(), to, p.kind));
                }
                _ => {
                    debug!(target = %p.target, kind = %p.kind, "unresolved relation target");
                    report.edges_skipped_unresolved += 1;
                }
            }
        }

        // Nodes first. Entities whose write fails keep their edges out of
        // the graph too.
        let node_results = self.write_nodes(&entities).await;
        let mut failed_ids: BTreeSet<EntityId> = BTreeSet::new();
        let mut changed_ids: BTreeSet<EntityId> = BTreeSet::new();
        for (id, result) in node_results {
            match result {
                Ok(WriteOutcome::Created) | Ok(WriteOutcome::Updated) => {
                    report.entities_written += 1;
                    changed_ids.insert(id);
                }
                Ok(WriteOutcome::Unchanged) => report.entities_unchanged += 1,
                Err(e) => {
                    warn!(entity = %id, error = %e, "node write failed");
                    report.write_failures.push(format!("node {}: {}", id, e));
                    failed_ids.insert(id);
                }
            }
        }

        // Then edges.
        for (from, to, kind) in &edges {
            if failed_ids.contains(from) || failed_ids.contains(to) {
                continue;
            }
            let rel = Relationship::new(from.clone(), to.clone(), *kind);
            match self.with_retry(|| self.graph.upsert_edge(&rel)).await {
                Ok(true) => report.edges_written += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(from = %from, to = %to, error = %e, "edge write failed");
                    report
                        .write_failures
                        .push(format!("edge {} -> {} ({}): {}", from, to, kind, e));
                }
            }
        }

        // Entities that vanished from the snapshot: flag stale, detach
        // their edges, drop their vectors.
        let vanished: Vec<EntityId> = previous_ids
            .into_iter()
            .filter(|id| !entities.contains_key(id))
            .collect();
        if !vanished.is_empty() {
            report.stale_removed = self
                .with_retry(|| self.graph.mark_stale(&vanished))
                .await?;
            self.with_retry(|| self.vectors.remove_vectors(&vanished))
                .await?;
        }

        // Embed entities that changed this run, plus any entity missing
        // a vector under the active model version.
        self.index_embeddings(&entities, &changed_ids, &mut report)
            .await?;

        info!(
            parsed = report.files_parsed,
            written = report.entities_written,
            unchanged = report.entities_unchanged,
            edges = report.edges_written,
            unresolved = report.edges_skipped_unresolved,
            embedded = report.embeddings_written,
            stale = report.stale_removed,
            "ingestion complete"
        );
        Ok(report)
    }

    /// Two distinct key tuples hashing to one id would silently merge
    /// entities; treat it as fatal.
    fn check_collision(
        &self,
        entities: &BTreeMap<EntityId, CodeEntity>,
        entity: &CodeEntity,
    ) -> Result<(), KnowledgeError> {
        if let Some(existing) = entities.get(&entity.id) {
            let same_key = existing.kind == entity.kind
                && existing.path == entity.path
                && existing.qualified_name == entity.qualified_name;
            if !same_key {
                return Err(KnowledgeError::Config(format!(
                    "Entity id collision: ({}, {}, {}) vs ({}, {}, {})",
                    existing.kind,
                    existing.path,
                    existing.qualified_name,
                    entity.kind,
                    entity.path,
                    entity.qualified_name
                )));
            }
        }
        Ok(())
    }

    /// Walk the snapshot and return sorted repository-relative paths of
    /// parseable files. Oversized files are recorded as skipped.
    fn collect_files(&self, root: &Path, report: &mut IngestReport) -> Vec<String> {
        let mut files = Vec::new();
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !self
                .config
                .include_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
                || !self.registry.can_parse(ext)
            {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if let Ok(meta) = entry.metadata() {
                if meta.len() > self.config.max_file_size {
                    warn!(path = %relative, size = meta.len(), "skipping oversized file");
                    report.files_skipped.push(SkippedFile {
                        path: relative,
                        reason: format!(
                            "exceeds max_file_size ({} > {})",
                            meta.len(),
                            self.config.max_file_size
                        ),
                    });
                    continue;
                }
            }
            files.push(relative);
        }

        // Sorted order keeps symbol resolution deterministic.
        files.sort();
        files
    }

    async fn write_nodes(
        &self,
        entities: &BTreeMap<EntityId, CodeEntity>,
    ) -> Vec<(EntityId, Result<WriteOutcome, KnowledgeError>)> {
        stream::iter(entities.values())
            .map(|entity| async move {
                let result = self.with_retry(|| self.graph.upsert_node(entity)).await;
                (entity.id.clone(), result)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await
    }

    /// Embed created and updated entities, plus any entity whose vector
    /// is absent under the active model version. The second set covers a
    /// fresh version tag and batches that failed on an earlier run, both
    /// of which leave unchanged nodes with no searchable vector.
    async fn index_embeddings(
        &self,
        entities: &BTreeMap<EntityId, CodeEntity>,
        changed_ids: &BTreeSet<EntityId>,
        report: &mut IngestReport,
    ) -> Result<(), KnowledgeError> {
        let indexed: BTreeSet<EntityId> = self
            .vectors
            .list_vector_ids(&self.model_version)
            .await?
            .into_iter()
            .collect();
        let items: Vec<(EntityId, String, String)> = entities
            .values()
            .filter(|e| {
                !e.source.is_empty()
                    && (changed_ids.contains(&e.id) || !indexed.contains(&e.id))
            })
            .map(|e| {
                // Docstrings carry intent the raw code often lacks.
                let text = match &e.doc_comment {
                    Some(doc) => format!("{}\n{}", doc, e.source),
                    None => e.source.clone(),
                };
                (e.id.clone(), e.content_hash.clone(), text)
            })
            .collect();

        let outcome = self.embedding.embed_entities(&items).await;
        report.embeddings_cached = outcome.reused;
        report.embeddings_failed = outcome.failed;

        let writes: Vec<(EntityId, Result<(), KnowledgeError>)> =
            stream::iter(outcome.embedded.iter())
                .map(|(id, vector)| async move {
                    let entity = &entities[id];
                    let metadata = VectorMetadata {
                        path: entity.path.clone(),
                        kind: entity.kind,
                        name: entity.qualified_name.clone(),
                    };
                    let result = self
                        .with_retry(|| {
                            self.vectors
                                .upsert_vector(id, vector, &metadata, &self.model_version)
                        })
                        .await;
                    (id.clone(), result)
                })
                .buffer_unordered(self.config.concurrency)
                .collect()
                .await;

        for (id, result) in writes {
            match result {
                Ok(()) => report.embeddings_written += 1,
                Err(e) => {
                    warn!(entity = %id, error = %e, "vector write failed");
                    report.write_failures.push(format!("vector {}: {}", id, e));
                }
            }
        }
        Ok(())
    }

    /// Retry a backend operation with exponential backoff.
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, KnowledgeError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, KnowledgeError>>,
    {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < attempts {
                        let delay = Duration::from_millis(self.config.retry_base_delay_ms)
                            * 2u32.saturating_pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_error.expect("at least one attempt"))
    }
}
