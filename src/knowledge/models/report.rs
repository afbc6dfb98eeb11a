//! Ingestion run reports.

use serde::{Deserialize, Serialize};

use super::entity::EntityId;

/// A file the ingestion pipeline skipped, with the reason it recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Summary of a single ingestion run.
///
/// Per-file and per-batch failures end up here instead of aborting the run;
/// only configuration errors are fatal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    /// Files successfully parsed.
    pub files_parsed: usize,
    /// Files skipped with reasons (unreadable, unparseable, oversized).
    pub files_skipped: Vec<SkippedFile>,
    /// Nodes created or updated in the graph.
    pub entities_written: usize,
    /// Nodes whose content hash matched the stored one.
    pub entities_unchanged: usize,
    /// Edges created.
    pub edges_written: usize,
    /// Pending relations whose target symbol never resolved to an entity.
    pub edges_skipped_unresolved: usize,
    /// Vectors written to the index.
    pub embeddings_written: usize,
    /// Vectors reused from the per-run content-hash cache.
    pub embeddings_cached: usize,
    /// Entities whose embedding batch failed after all retries.
    pub embeddings_failed: Vec<EntityId>,
    /// Entities marked stale because they vanished from the snapshot.
    pub stale_removed: usize,
    /// Backend write failures that exhausted their retries.
    pub write_failures: Vec<String>,
}

impl IngestReport {
    /// True when the run performed no graph or vector writes.
    pub fn is_noop(&self) -> bool {
        self.entities_written == 0
            && self.edges_written == 0
            && self.embeddings_written == 0
            && self.stale_removed == 0
    }
}
