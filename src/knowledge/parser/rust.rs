//! Rust parser using tree-sitter.

use tree_sitter::Node;

use super::result::ParseResult;
use super::traits::Parser;
use super::treesitter::TreeSitterParser;
use crate::knowledge::models::{CodeEntity, EntityId, EntityKind, RelationKind, Relationship};

/// Rust parser using tree-sitter.
///
/// Extracts free functions, impl methods (`Type::method`), type
/// definitions (structs, enums, traits), inline modules, use targets,
/// and call sites.
pub struct RustParser {
    base: TreeSitterParser,
}

impl RustParser {
    pub fn new() -> Self {
        Self {
            base: TreeSitterParser::new(tree_sitter_rust::LANGUAGE.into()),
        }
    }

    /// Doc comment from the `///` lines immediately preceding a node.
    fn extract_doc_comment(node: &Node, content: &str) -> Option<String> {
        let mut lines = Vec::new();
        let mut sibling = node.prev_sibling();

        while let Some(s) = sibling {
            if s.kind() == "line_comment" {
                let text = TreeSitterParser::node_text(&s, content);
                if let Some(stripped) = text.strip_prefix("///") {
                    lines.push(stripped.trim().to_string());
                    sibling = s.prev_sibling();
                    continue;
                }
            }
            break;
        }

        if lines.is_empty() {
            None
        } else {
            lines.reverse();
            Some(lines.join("\n"))
        }
    }

    fn make_entity(
        &self,
        node: &Node,
        content: &str,
        path: &str,
        kind: EntityKind,
        qualified: &str,
    ) -> CodeEntity {
        CodeEntity::new(
            kind,
            path,
            qualified,
            "rust",
            (node.start_byte(), node.end_byte()),
            (
                TreeSitterParser::node_line(node),
                TreeSitterParser::node_end_line(node),
            ),
            TreeSitterParser::node_text(node, content),
        )
        .with_doc(Self::extract_doc_comment(node, content))
    }

    fn extract_calls(
        &self,
        node: &Node,
        content: &str,
        caller: &EntityId,
        result: &mut ParseResult,
    ) {
        if node.kind() == "call_expression" {
            if let Some(func_node) = node.child_by_field_name("function") {
                let target = match func_node.kind() {
                    "identifier" => {
                        Some(TreeSitterParser::node_text(&func_node, content).to_string())
                    }
                    // `value.method()` keeps the bare method name.
                    "field_expression" => func_node
                        .child_by_field_name("field")
                        .map(|f| TreeSitterParser::node_text(&f, content).to_string()),
                    // `Type::method()` keeps the qualified form.
                    "scoped_identifier" => {
                        Some(TreeSitterParser::node_text(&func_node, content).to_string())
                    }
                    _ => None,
                };
                if let Some(target) = target {
                    result.add_pending(caller.clone(), RelationKind::Calls, target);
                }
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "function_item" {
                continue;
            }
            self.extract_calls(&child, content, caller, result);
        }
    }

    fn extract_function(
        &self,
        node: &Node,
        content: &str,
        path: &str,
        container: &EntityId,
        type_prefix: Option<&str>,
        result: &mut ParseResult,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = TreeSitterParser::node_text(&name_node, content);
        let qualified = match type_prefix {
            Some(prefix) => format!("{}::{}", prefix, name),
            None => name.to_string(),
        };

        let entity = self.make_entity(node, content, path, EntityKind::Function, &qualified);
        let func_id = entity.id.clone();
        result.add_entity(entity);
        result.add_relationship(Relationship::new(
            container.clone(),
            func_id.clone(),
            RelationKind::Contains,
        ));

        if let Some(body) = node.child_by_field_name("body") {
            self.extract_calls(&body, content, &func_id, result);
        }
    }

    fn extract_impl(
        &self,
        node: &Node,
        content: &str,
        path: &str,
        file_id: &EntityId,
        result: &mut ParseResult,
    ) {
        let Some(type_node) = node.child_by_field_name("type") else {
            return;
        };
        let type_name = TreeSitterParser::node_text(&type_node, content);

        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for child in body.children(&mut cursor) {
                if child.kind() == "function_item" {
                    self.extract_function(&child, content, path, file_id, Some(type_name), result);
                }
            }
        }
    }

    fn process_node(
        &self,
        node: Node,
        content: &str,
        path: &str,
        file_id: &EntityId,
        result: &mut ParseResult,
    ) {
        match node.kind() {
            "function_item" => {
                self.extract_function(&node, content, path, file_id, None, result);
                return;
            }
            "impl_item" => {
                self.extract_impl(&node, content, path, file_id, result);
                return;
            }
            "struct_item" | "enum_item" | "trait_item" => {
                if let Some(name_node) = node.child_by_field_name("name") {
                    let name = TreeSitterParser::node_text(&name_node, content);
                    let entity = self.make_entity(&node, content, path, EntityKind::Class, name);
                    let id = entity.id.clone();
                    result.add_entity(entity);
                    result.add_relationship(Relationship::new(
                        file_id.clone(),
                        id,
                        RelationKind::Contains,
                    ));
                }
                // Trait bodies may declare default methods; skip them, the
                // impl blocks carry the reachable code.
                return;
            }
            "mod_item" => {
                if let Some(name_node) = node.child_by_field_name("name") {
                    let name = TreeSitterParser::node_text(&name_node, content);
                    let entity = self.make_entity(&node, content, path, EntityKind::Module, name);
                    let id = entity.id.clone();
                    result.add_entity(entity);
                    result.add_relationship(Relationship::new(
                        file_id.clone(),
                        id,
                        RelationKind::Contains,
                    ));
                }
                // Fall through to index the module body.
            }
            "use_declaration" => {
                if let Some(arg) = node.child_by_field_name("argument") {
                    let target = TreeSitterParser::node_text(&arg, content);
                    result.add_pending(file_id.clone(), RelationKind::Imports, target);
                }
                return;
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.process_node(child, content, path, file_id, result);
        }
    }
}

impl Default for RustParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for RustParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<ParseResult, String> {
        let tree = self.base.parse_tree(content)?;
        let mut result = ParseResult::new(path);

        let file_entity = CodeEntity::file(path, "rust", content);
        let file_id = file_entity.id.clone();
        result.add_entity(file_entity);

        self.process_node(tree.root_node(), content, path, &file_id, &mut result);

        Ok(result)
    }

    fn language_name(&self) -> &'static str {
        "Rust"
    }

    fn supported_extensions(&self) -> &[&'static str] {
        &["rs"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParseResult {
        RustParser::new().parse_file("src/sample.rs", content).unwrap()
    }

    fn find<'a>(result: &'a ParseResult, name: &str) -> &'a CodeEntity {
        result
            .entities
            .iter()
            .find(|e| e.qualified_name == name)
            .unwrap_or_else(|| panic!("no entity named {}", name))
    }

    #[test]
    fn test_extracts_free_functions_with_doc_comments() {
        let result = parse("/// Adds two numbers.\nfn add(a: i32, b: i32) -> i32 { a + b }\n");
        let func = find(&result, "add");
        assert_eq!(func.kind, EntityKind::Function);
        assert_eq!(func.doc_comment.as_deref(), Some("Adds two numbers."));
    }

    #[test]
    fn test_impl_methods_are_type_qualified() {
        let result = parse("struct Counter;\nimpl Counter {\n    fn bump(&mut self) {}\n}\n");
        let ty = find(&result, "Counter");
        let method = find(&result, "Counter::bump");
        assert_eq!(ty.kind, EntityKind::Class);
        assert_eq!(method.kind, EntityKind::Function);
    }

    #[test]
    fn test_call_sites_become_pending_calls() {
        let result = parse("fn a() { b(); }\nfn b() {}\n");
        let a = find(&result, "a");
        assert!(result
            .pending
            .iter()
            .any(|p| p.from == a.id && p.kind == RelationKind::Calls && p.target == "b"));
    }

    #[test]
    fn test_use_declarations_are_imports() {
        let result = parse("use std::collections::HashMap;\n");
        let file = find(&result, "src/sample.rs");
        assert!(result
            .pending
            .iter()
            .any(|p| p.from == file.id
                && p.kind == RelationKind::Imports
                && p.target == "std::collections::HashMap"));
    }

    #[test]
    fn test_inline_modules_are_entities() {
        let result = parse("mod inner {\n    fn helper() {}\n}\n");
        let module = find(&result, "inner");
        assert_eq!(module.kind, EntityKind::Module);
        assert!(result.entities.iter().any(|e| e.qualified_name == "helper"));
    }
}
