//! Source parsing: language parsers behind a common trait and registry.

mod python;
mod registry;
mod result;
mod rust;
mod traits;
mod treesitter;

pub use python::PythonParser;
pub use registry::ParserRegistry;
pub use result::{ParseResult, PendingRelation};
pub use rust::RustParser;
pub use traits::Parser;
