pub mod python;
pub mod rust;
pub mod typescript;

use tree_sitter::Language;

use crate::elements::{LanguageCodeDescriptor, NodePredicate};
use crate::optimize::literals::LanguageLiteralDescriptor;

/// Everything the code adapter needs to know about one language: grammar,
/// named queries, element profiles, literal patterns, comment syntax and
/// import classification.
pub struct LanguageSpec {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub fence: &'static str,
    /// Extension-sensitive grammar pick (`.tsx` wants the TSX variant).
    pub language_for: fn(ext: &str) -> Language,
    pub queries: &'static [(&'static str, &'static str)],
    pub code: &'static LanguageCodeDescriptor,
    pub literals: &'static LanguageLiteralDescriptor,
    pub comment_single: &'static str,
    pub comment_block: (&'static str, &'static str),
    pub doc_comment_prefixes: &'static [&'static str],
    /// Render stripped bodies as `{ /* … */ }` instead of a comment line.
    pub body_stub_braces: bool,
    pub is_local_import: fn(&str) -> bool,
    pub is_docstring: Option<NodePredicate>,
}

static ALL: [&LanguageSpec; 3] = [&python::SPEC, &typescript::SPEC, &rust::SPEC];

pub fn all() -> &'static [&'static LanguageSpec] {
    &ALL
}

/// Lookup by dot-extension (lowercase).
pub fn spec_for_extension(ext: &str) -> Option<&'static LanguageSpec> {
    all()
        .iter()
        .find(|spec| spec.extensions.contains(&ext))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_expected_extensions() {
        assert_eq!(spec_for_extension(".py").unwrap().name, "python");
        assert_eq!(spec_for_extension(".tsx").unwrap().name, "typescript");
        assert_eq!(spec_for_extension(".rs").unwrap().name, "rust");
        assert!(spec_for_extension(".zig").is_none());
    }
}
