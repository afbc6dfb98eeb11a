//! Parse results: entities, resolved edges, and pending relations.

use crate::knowledge::models::{CodeEntity, RelationKind, Relationship};

/// A relation whose target is still a symbol name rather than an entity.
///
/// Parsers see one file at a time, so cross-file targets (call sites,
/// imports, base classes) are recorded by name and resolved against the
/// run-wide symbol table once every file has been parsed.
#[derive(Debug, Clone)]
pub struct PendingRelation {
    /// Source entity, already resolved within the file.
    pub from: crate::knowledge::models::EntityId,
    pub kind: RelationKind,
    /// Target symbol: a qualified name (`Class.method`), a bare name, or
    /// a dotted module path for imports.
    pub target: String,
}

/// Everything a parser extracted from a single file.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Relative path of the parsed file.
    pub file_path: String,
    /// Extracted entities, the file entity included.
    pub entities: Vec<CodeEntity>,
    /// Edges fully resolved within the file (`Contains`).
    pub relationships: Vec<Relationship>,
    /// Relations awaiting symbol resolution.
    pub pending: Vec<PendingRelation>,
    /// Non-fatal oddities worth surfacing in logs.
    pub warnings: Vec<String>,
}

impl ParseResult {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Default::default()
        }
    }

    pub fn add_entity(&mut self, entity: CodeEntity) {
        self.entities.push(entity);
    }

    pub fn add_relationship(&mut self, rel: Relationship) {
        self.relationships.push(rel);
    }

    pub fn add_pending(
        &mut self,
        from: crate::knowledge::models::EntityId,
        kind: RelationKind,
        target: impl Into<String>,
    ) {
        self.pending.push(PendingRelation {
            from,
            kind,
            target: target.into(),
        });
    }

    /// Total number of extracted entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}
