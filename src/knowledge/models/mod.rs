//! Data model: entities, relationships, and run reports.

mod entity;
mod report;

pub use entity::{content_hash, CodeEntity, EntityId, EntityKind, RelationKind, Relationship};
pub use report::{IngestReport, SkippedFile};
