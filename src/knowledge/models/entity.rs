//! Code entities and relationships: the node and edge types of the graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier for a code entity.
///
/// Derived as the SHA-256 of `(kind, relative path, qualified name)`, so
/// re-ingesting unchanged code always yields the same id regardless of
/// parse order or process identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Derive the id for an entity. Pure and deterministic; the NUL
    /// separators make the encoding injective over valid inputs.
    pub fn derive(kind: EntityKind, path: &str, qualified_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(qualified_name.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of code entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    File,
    Module,
    Class,
    Function,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Module => "module",
            Self::Class => "class",
            Self::Function => "function",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed directed edge between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Contains,
    Calls,
    Imports,
    Inherits,
    References,
}

impl RelationKind {
    pub const ALL: [RelationKind; 5] = [
        Self::Contains,
        Self::Calls,
        Self::Imports,
        Self::Inherits,
        Self::References,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Calls => "calls",
            Self::Imports => "imports",
            Self::Inherits => "inherits",
            Self::References => "references",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed unit of source code with a stable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeEntity {
    /// Stable identifier derived from (kind, path, qualified name).
    pub id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Repository-relative path of the containing file.
    pub path: String,
    /// Qualified name (`Class.method` for methods, the path for files).
    pub qualified_name: String,
    /// Language tag ("python", "rust").
    pub language: String,
    /// Byte span within the file.
    pub start_byte: usize,
    pub end_byte: usize,
    /// Line span within the file (1-based).
    pub start_line: u32,
    pub end_line: u32,
    /// Raw source text of the span. Empty for file entities.
    pub source: String,
    /// Docstring or doc comment, when the parser found one.
    pub doc_comment: Option<String>,
    /// SHA-256 of the source text, used to detect changes on re-ingestion.
    pub content_hash: String,
    /// Set when the source entity disappeared from the latest snapshot.
    pub stale: bool,
    /// When the entity was last indexed.
    pub indexed_at: DateTime<Utc>,
}

impl CodeEntity {
    /// Create an entity, deriving its stable id and content hash.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: EntityKind,
        path: impl Into<String>,
        qualified_name: impl Into<String>,
        language: impl Into<String>,
        byte_span: (usize, usize),
        line_span: (u32, u32),
        source: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let qualified_name = qualified_name.into();
        let source = source.into();
        Self {
            id: EntityId::derive(kind, &path, &qualified_name),
            kind,
            path,
            qualified_name,
            language: language.into(),
            start_byte: byte_span.0,
            end_byte: byte_span.1,
            start_line: line_span.0,
            end_line: line_span.1,
            content_hash: content_hash(&source),
            source,
            doc_comment: None,
            stale: false,
            indexed_at: Utc::now(),
        }
    }

    /// File entity for a whole source file. The hash covers the file
    /// content, but the source text is not duplicated onto the node.
    pub fn file(path: impl Into<String>, language: impl Into<String>, content: &str) -> Self {
        let path = path.into();
        let lines = content.lines().count() as u32;
        let mut entity = Self::new(
            EntityKind::File,
            path.clone(),
            path,
            language,
            (0, content.len()),
            (1, lines.max(1)),
            "",
        );
        entity.content_hash = content_hash(content);
        entity
    }

    pub fn with_doc(mut self, doc: Option<String>) -> Self {
        self.doc_comment = doc;
        self
    }
}

/// Directed relationship between two entities.
///
/// Deduplicated within a kind: at most one edge of a given kind exists
/// between an ordered pair, while multiple kinds may coexist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub from: EntityId,
    pub to: EntityId,
    pub kind: RelationKind,
}

impl Relationship {
    pub fn new(from: EntityId, to: EntityId, kind: RelationKind) -> Self {
        Self { from, to, kind }
    }

    /// Dedup key.
    pub fn key(&self) -> (EntityId, EntityId, RelationKind) {
        (self.from.clone(), self.to.clone(), self.kind)
    }
}

/// SHA-256 hex digest of a text, used for change detection and the
/// per-run embedding cache.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
