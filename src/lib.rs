//! patchgraph: a hybrid knowledge base for source code.
//!
//! Represents a repository snapshot as both a structural graph of code
//! entities (files, modules, classes, functions and their relationships)
//! and a vector index of semantic embeddings, then fuses the two views at
//! query time to retrieve the minimal context needed to ground an
//! automated patch-generation step.

pub mod config;
pub mod context;
pub mod knowledge;
pub mod llm;

pub use config::{Config, ConfigError};
pub use context::{ContextAssembler, ContextPayload};
pub use knowledge::{KnowledgeBase, KnowledgeError};
