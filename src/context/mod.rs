//! Context assembly: render a ranked query context into a token-budgeted
//! prompt payload.

use crate::knowledge::models::EntityId;
use crate::knowledge::query::{QueryContext, RetrievedEntity};

/// Assembled, budgeted context ready to hand to a patch generator.
#[derive(Debug, Clone, Default)]
pub struct ContextPayload {
    /// Rendered markdown blocks, in rank order.
    pub rendered: String,
    /// Entities included, in rank order.
    pub included: Vec<EntityId>,
    /// Entities dropped for lack of budget.
    pub dropped: usize,
    /// Estimated tokens consumed.
    pub tokens_used: usize,
}

/// Renders retrieved entities under a fixed token budget.
///
/// Entities are visited in rank order. An entity that does not fit in
/// the remaining budget is dropped whole, never truncated; later,
/// smaller entries may still be included.
pub struct ContextAssembler {
    token_budget: usize,
}

impl ContextAssembler {
    pub fn new(token_budget: usize) -> Self {
        Self { token_budget }
    }

    /// Deterministic token estimate: one token per four characters,
    /// rounded up.
    pub fn estimate_tokens(text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    fn render_entry(entry: &RetrievedEntity) -> String {
        let entity = &entry.entity;
        let origin = if entry.is_seed {
            format!("seed, score {:.2}", entry.score)
        } else {
            format!("hop {}, score {:.2}", entry.hops, entry.score)
        };
        // File nodes carry no source text; a header keeps them visible.
        if entity.source.is_empty() {
            return format!(
                "### {} [{}] {} ({})\n\n",
                entity.path, entity.kind, entity.qualified_name, origin
            );
        }
        format!(
            "### {} [{}] {} ({})\n```{}\n{}\n```\n\n",
            entity.path, entity.kind, entity.qualified_name, origin, entity.language, entity.source
        )
    }

    /// Assemble the payload for a query context.
    pub fn assemble(&self, context: &QueryContext) -> ContextPayload {
        let mut payload = ContextPayload::default();

        for entry in &context.entries {
            let block = Self::render_entry(entry);
            let cost = Self::estimate_tokens(&block);
            if payload.tokens_used + cost > self.token_budget {
                payload.dropped += 1;
                continue;
            }
            payload.rendered.push_str(&block);
            payload.included.push(entry.entity.id.clone());
            payload.tokens_used += cost;
        }

        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::models::{CodeEntity, EntityKind};

    fn entry(name: &str, source: &str, score: f32, hops: usize) -> RetrievedEntity {
        let entity = CodeEntity::new(
            EntityKind::Function,
            "a.py",
            name,
            "python",
            (0, source.len()),
            (1, 1),
            source,
        );
        RetrievedEntity {
            entity,
            score,
            hops,
            is_seed: hops == 0,
        }
    }

    fn context(entries: Vec<RetrievedEntity>) -> QueryContext {
        QueryContext {
            query: "q".to_string(),
            entries,
        }
    }

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(ContextAssembler::estimate_tokens(""), 0);
        assert_eq!(ContextAssembler::estimate_tokens("abc"), 1);
        assert_eq!(ContextAssembler::estimate_tokens("abcd"), 1);
        assert_eq!(ContextAssembler::estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_budget_is_respected() {
        let assembler = ContextAssembler::new(40);
        let payload = assembler.assemble(&context(vec![
            entry("a", "def a(): pass", 0.9, 0),
            entry("b", "def b(): pass", 0.8, 0),
            entry("c", "def c(): pass", 0.7, 0),
        ]));
        assert!(payload.tokens_used <= 40);
        assert_eq!(payload.included.len() + payload.dropped, 3);
    }

    #[test]
    fn test_oversized_entry_dropped_whole_later_entries_still_fit() {
        let assembler = ContextAssembler::new(60);
        let big = "x".repeat(600);
        let payload = assembler.assemble(&context(vec![
            entry("big", &big, 0.9, 0),
            entry("small", "def s(): pass", 0.8, 1),
        ]));
        assert_eq!(payload.dropped, 1);
        assert_eq!(payload.included.len(), 1);
        // Nothing is ever truncated.
        assert!(payload.rendered.contains("def s(): pass"));
        assert!(!payload.rendered.contains(&big));
    }

    #[test]
    fn test_headers_name_origin() {
        let assembler = ContextAssembler::new(1000);
        let payload = assembler.assemble(&context(vec![
            entry("a", "def a(): pass", 0.93, 0),
            entry("b", "def b(): pass", 0.23, 2),
        ]));
        assert!(payload.rendered.contains("(seed, score 0.93)"));
        assert!(payload.rendered.contains("(hop 2, score 0.23)"));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let assembler = ContextAssembler::new(100);
        let ctx = context(vec![
            entry("a", "def a(): pass", 0.9, 0),
            entry("b", "def b(): pass", 0.8, 1),
        ]);
        let first = assembler.assemble(&ctx);
        let second = assembler.assemble(&ctx);
        assert_eq!(first.rendered, second.rendered);
        assert_eq!(first.included, second.included);
        assert_eq!(first.tokens_used, second.tokens_used);
    }

    #[test]
    fn test_empty_source_entities_render_header_only() {
        let assembler = ContextAssembler::new(100);
        let payload = assembler.assemble(&context(vec![
            entry("pkg", "", 0.9, 0),
            entry("a", "def a(): pass", 0.8, 0),
        ]));
        // Both entries are included and budgeted; the sourceless one
        // gets a header block with no code fence.
        assert_eq!(payload.dropped, 0);
        assert_eq!(payload.included.len(), 2);
        assert!(payload
            .rendered
            .starts_with("### a.py [function] pkg (seed, score 0.90)\n\n###"));
        assert!(payload.tokens_used > 0);
    }
}
