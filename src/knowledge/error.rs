//! Knowledge base error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or querying the knowledge base.
///
/// Per-file and per-batch variants are recoverable: the ingestion pipeline
/// records them in the run report and keeps going. `Config` is fatal and
/// aborts the run immediately.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// A single file could not be parsed. Recoverable: the file is skipped.
    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    /// An embedding batch failed after exhausting its retries.
    #[error("Embedding batch failed after {attempts} attempts: {message}")]
    EmbeddingBatch { attempts: u32, message: String },

    /// Embedding model error (initialization or single-call failure).
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A write against the graph or vector backend failed.
    #[error("Backend write error: {0}")]
    BackendWrite(String),

    /// A read against the graph or vector backend failed. Surfaced to the
    /// caller as a failed retrieval, never as silently-partial data.
    #[error("Backend query error: {0}")]
    BackendQuery(String),

    /// IO error.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration (id collision, missing model-version, bad
    /// tunables). Fatal.
    #[error("Configuration error: {0}")]
    Config(String),
}
