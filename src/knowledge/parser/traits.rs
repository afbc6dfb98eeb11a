//! Core parser trait for language-agnostic entity extraction.

use super::result::ParseResult;

/// Language-agnostic parser trait.
///
/// Implement this trait for each language to extract code entities and
/// relationships from source text. Each parser is responsible for:
///
/// 1. **Entity extraction**: files, modules, classes, functions
/// 2. **Resolved edges**: `Contains` edges within the file
/// 3. **Pending relations**: `Calls`/`Imports`/`Inherits`/`References`
///    targets named by symbol, resolved later against the run-wide
///    symbol table
///
/// Parsing is pure: no IO, no backend access, deterministic for a given
/// `(path, content)` pair.
pub trait Parser: Send + Sync {
    /// Parse a source file and extract entities and relations.
    ///
    /// # Arguments
    /// * `path` - Relative path to the file (used for entity ids)
    /// * `content` - Source code content
    fn parse_file(&self, path: &str, content: &str) -> Result<ParseResult, String>;

    /// Human-readable language name.
    fn language_name(&self) -> &'static str;

    /// File extensions this parser handles.
    fn supported_extensions(&self) -> &[&'static str];

    /// Check if this parser can handle the given file extension.
    fn can_parse(&self, extension: &str) -> bool {
        self.supported_extensions()
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }
}
