//! Python parser using tree-sitter.

use tree_sitter::Node;

use super::result::ParseResult;
use super::traits::Parser;
use super::treesitter::TreeSitterParser;
use crate::knowledge::models::{CodeEntity, EntityId, EntityKind, RelationKind, Relationship};

/// Python parser using tree-sitter.
///
/// Extracts classes (with base lists), functions and methods (qualified
/// `Class.method`), docstrings, call sites, and imports. Cross-file
/// targets are emitted as pending relations resolved after the whole
/// snapshot has been parsed.
pub struct PythonParser {
    base: TreeSitterParser,
}

/// Enclosing class while walking a class body.
struct ClassScope<'a> {
    name: &'a str,
    id: EntityId,
    bases: &'a [String],
}

impl PythonParser {
    pub fn new() -> Self {
        Self {
            base: TreeSitterParser::new(tree_sitter_python::LANGUAGE.into()),
        }
    }

    fn extract_docstring(&self, node: &Node, content: &str) -> Option<String> {
        // First statement of the body, when it is a bare string.
        let body = node.child_by_field_name("body")?;
        let mut cursor = body.walk();
        let first_stmt = body.children(&mut cursor).next()?;

        if first_stmt.kind() == "expression_statement" {
            let mut stmt_cursor = first_stmt.walk();
            let string_node = first_stmt
                .children(&mut stmt_cursor)
                .find(|c| c.kind() == "string")?;
            let text = TreeSitterParser::node_text(&string_node, content);
            let cleaned = text
                .trim_start_matches("\"\"\"")
                .trim_end_matches("\"\"\"")
                .trim_start_matches("'''")
                .trim_end_matches("'''")
                .trim_start_matches('"')
                .trim_end_matches('"')
                .trim_start_matches('\'')
                .trim_end_matches('\'')
                .trim();
            if !cleaned.is_empty() {
                return Some(cleaned.to_string());
            }
        }

        None
    }

    fn extract_bases(&self, node: &Node, content: &str) -> Vec<String> {
        node.child_by_field_name("superclasses")
            .map(|sc| {
                let mut cursor = sc.walk();
                sc.children(&mut cursor)
                    .filter(|c| c.kind() == "identifier" || c.kind() == "attribute")
                    .map(|c| TreeSitterParser::node_text(&c, content).to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record pending `Calls` relations for every call site under `node`.
    ///
    /// `self.m()` inside a class resolves to `Class.m`; other attribute
    /// calls keep the bare method name for best-effort resolution.
    fn extract_calls(
        &self,
        node: &Node,
        content: &str,
        caller: &EntityId,
        class: Option<&ClassScope<'_>>,
        result: &mut ParseResult,
    ) {
        if node.kind() == "call" {
            if let Some(func_node) = node.child_by_field_name("function") {
                let target = match func_node.kind() {
                    "attribute" => {
                        let object = func_node
                            .child_by_field_name("object")
                            .map(|o| TreeSitterParser::node_text(&o, content));
                        func_node.child_by_field_name("attribute").map(|attr| {
                            let method = TreeSitterParser::node_text(&attr, content);
                            match (object, class) {
                                (Some("self"), Some(scope)) => {
                                    format!("{}.{}", scope.name, method)
                                }
                                _ => method.to_string(),
                            }
                        })
                    }
                    "identifier" => {
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
            // Nested defs own their call sites.
            if child.kind() == "function_definition" || child.kind() == "class_definition" {
                continue;
            }
            self.extract_calls(&child, content, caller, class, result);
        }
    }

    fn extract_function(
        &self,
        node: &Node,
        content: &str,
        path: &str,
        file_id: &EntityId,
        class: Option<&ClassScope<'_>>,
        result: &mut ParseResult,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            result
                .warnings
                .push(format!("{}: function definition without a name", path));
            return;
        };
        let name = TreeSitterParser::node_text(&name_node, content);
        let qualified = match class {
            Some(scope) => format!("{}.{}", scope.name, name),
            None => name.to_string(),
        };

        let entity = CodeEntity::new(
            EntityKind::Function,
            path,
            &qualified,
            "python",
            (node.start_byte(), node.end_byte()),
            (
                TreeSitterParser::node_line(node),
                TreeSitterParser::node_end_line(node),
            ),
            TreeSitterParser::node_text(node, content),
        )
        .with_doc(self.extract_docstring(node, content));
        let func_id = entity.id.clone();
        result.add_entity(entity);

        // Containment: file owns top-level functions, class owns methods.
        let container = class.map(|s| s.id.clone()).unwrap_or_else(|| file_id.clone());
        result.add_relationship(Relationship::new(
            container,
            func_id.clone(),
            RelationKind::Contains,
        ));

        // A method name shared with a base class is an override.
        if let Some(scope) = class {
            if !(name.starts_with("__") && name.ends_with("__")) {
                for base in scope.bases {
                    result.add_pending(
                        func_id.clone(),
                        RelationKind::References,
                        format!("{}.{}", base, name),
                    );
                }
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.extract_calls(&body, content, &func_id, class, result);
        }
    }

    fn extract_class(
        &self,
        node: &Node,
        content: &str,
        path: &str,
        file_id: &EntityId,
        result: &mut ParseResult,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            result
                .warnings
                .push(format!("{}: class definition without a name", path));
            return;
        };
        let name = TreeSitterParser::node_text(&name_node, content).to_string();
        let bases = self.extract_bases(node, content);

        let entity = CodeEntity::new(
            EntityKind::Class,
            path,
            &name,
            "python",
            (node.start_byte(), node.end_byte()),
            (
                TreeSitterParser::node_line(node),
                TreeSitterParser::node_end_line(node),
            ),
            TreeSitterParser::node_text(node, content),
        )
        .with_doc(self.extract_docstring(node, content));
        let class_id = entity.id.clone();
        result.add_entity(entity);

        result.add_relationship(Relationship::new(
            file_id.clone(),
            class_id.clone(),
            RelationKind::Contains,
        ));
        for base in &bases {
            result.add_pending(class_id.clone(), RelationKind::Inherits, base.clone());
        }

        let scope = ClassScope {
            name: &name,
            id: class_id,
            bases: &bases,
        };
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for child in body.children(&mut cursor) {
                let def = match child.kind() {
                    "function_definition" => Some(child),
                    // `async def` and decorated methods wrap the definition.
                    "decorated_definition" => child.child_by_field_name("definition"),
                    _ => None,
                };
                if let Some(def) = def {
                    if def.kind() == "function_definition" {
                        self.extract_function(&def, content, path, file_id, Some(&scope), result);
                    }
                }
            }
        }
    }

    fn extract_import(
        &self,
        node: &Node,
        content: &str,
        file_id: &EntityId,
        result: &mut ParseResult,
    ) {
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    match child.kind() {
                        "dotted_name" => {
                            let module = TreeSitterParser::node_text(&child, content);
                            result.add_pending(file_id.clone(), RelationKind::Imports, module);
                        }
                        "aliased_import" => {
                            if let Some(name) = child.child_by_field_name("name") {
                                let module = TreeSitterParser::node_text(&name, content);
                                result.add_pending(file_id.clone(), RelationKind::Imports, module);
                            }
                        }
                        _ => {}
                    }
                }
            }
            "import_from_statement" => {
                if let Some(module) = node.child_by_field_name("module_name") {
                    let module = TreeSitterParser::node_text(&module, content);
                    result.add_pending(file_id.clone(), RelationKind::Imports, module);
                }
            }
            _ => {}
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
            "function_definition" => {
                self.extract_function(&node, content, path, file_id, None, result);
                return;
            }
            "class_definition" => {
                self.extract_class(&node, content, path, file_id, result);
                return;
            }
            "import_statement" | "import_from_statement" => {
                self.extract_import(&node, content, file_id, result);
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

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for PythonParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<ParseResult, String> {
        let tree = self.base.parse_tree(content)?;
        let mut result = ParseResult::new(path);

        let file_entity = CodeEntity::file(path, "python", content);
        let file_id = file_entity.id.clone();
        result.add_entity(file_entity);

        self.process_node(tree.root_node(), content, path, &file_id, &mut result);

        Ok(result)
    }

    fn language_name(&self) -> &'static str {
        "Python"
    }

    fn supported_extensions(&self) -> &[&'static str] {
        &["py", "pyi"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParseResult {
        PythonParser::new().parse_file("pkg/sample.py", content).unwrap()
    }

    fn find<'a>(result: &'a ParseResult, name: &str) -> &'a CodeEntity {
        result
            .entities
            .iter()
            .find(|e| e.qualified_name == name)
            .unwrap_or_else(|| panic!("no entity named {}", name))
    }

    #[test]
    fn test_extracts_functions_and_docstrings() {
        let result = parse("def greet(name):\n    \"\"\"Say hello.\"\"\"\n    return name\n");
        let func = find(&result, "greet");
        assert_eq!(func.kind, EntityKind::Function);
        assert_eq!(func.doc_comment.as_deref(), Some("Say hello."));
        assert!(func.source.starts_with("def greet"));
    }

    #[test]
    fn test_methods_are_qualified_by_class() {
        let result = parse("class Store:\n    def put(self, k):\n        pass\n");
        let class = find(&result, "Store");
        let method = find(&result, "Store.put");
        assert_eq!(class.kind, EntityKind::Class);
        assert_eq!(method.kind, EntityKind::Function);
        // Class contains the method, file contains the class.
        assert!(result
            .relationships
            .iter()
            .any(|r| r.from == class.id && r.to == method.id && r.kind == RelationKind::Contains));
    }

    #[test]
    fn test_self_calls_resolve_to_class_scope() {
        let result = parse(
            "class Store:\n    def put(self, k):\n        self.flush()\n    def flush(self):\n        pass\n",
        );
        let put = find(&result, "Store.put");
        assert!(result
            .pending
            .iter()
            .any(|p| p.from == put.id && p.kind == RelationKind::Calls && p.target == "Store.flush"));
    }

    #[test]
    fn test_base_classes_become_pending_inherits() {
        let result = parse("class Child(Base):\n    def run(self):\n        pass\n");
        let child = find(&result, "Child");
        assert!(result
            .pending
            .iter()
            .any(|p| p.from == child.id && p.kind == RelationKind::Inherits && p.target == "Base"));
        // Overriding candidate recorded against the base method.
        let run = find(&result, "Child.run");
        assert!(result
            .pending
            .iter()
            .any(|p| p.from == run.id && p.kind == RelationKind::References && p.target == "Base.run"));
    }

    #[test]
    fn test_imports_are_recorded_from_the_file() {
        let result = parse("import os.path\nfrom pkg.helpers import total\n");
        let file = find(&result, "pkg/sample.py");
        let targets: Vec<&str> = result
            .pending
            .iter()
            .filter(|p| p.from == file.id && p.kind == RelationKind::Imports)
            .map(|p| p.target.as_str())
            .collect();
        assert!(targets.contains(&"os.path"));
        assert!(targets.contains(&"pkg.helpers"));
    }

    #[test]
    fn test_file_entity_always_present() {
        let result = parse("x = 1\n");
        let file = find(&result, "pkg/sample.py");
        assert_eq!(file.kind, EntityKind::File);
        assert!(file.source.is_empty());
    }
}
