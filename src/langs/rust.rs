use tree_sitter::{Language, Node};

use crate::document::SourceDocument;
use crate::elements::{ElementProfile, LanguageCodeDescriptor};
use crate::optimize::literals::{
    Delim, LanguageLiteralDescriptor, LiteralCategory, LiteralPattern, PlaceholderPosition,
};

use super::LanguageSpec;

pub const QUERIES: &[(&str, &str)] = &[
    (
        "literals",
        r#"
        (string_literal) @string
        (raw_string_literal) @string
        (array_expression) @sequence
        (macro_invocation) @factory
        "#,
    ),
    (
        "comments",
        r#"
        (line_comment) @comment
        (block_comment) @comment
        "#,
    ),
    (
        "imports",
        r#"
        (use_declaration) @import
        (extern_crate_declaration) @import
        "#,
    ),
];

// --- visibility ---

fn is_in_trait_impl(node: Node, doc: &SourceDocument) -> bool {
    let mut current = node.parent();
    while let Some(p) = current {
        match p.kind() {
            "impl_item" => {
                // Trait impls carry a `for` keyword between trait and type.
                let mut cursor = p.walk();
                return p.children(&mut cursor).any(|c| c.kind() == "for");
            }
            "source_file" | "mod_item" => return false,
            _ => current = p.parent(),
        }
    }
    let _ = doc;
    false
}

fn parent_trait<'t>(node: Node<'t>) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(p) = current {
        match p.kind() {
            "trait_item" => return Some(p),
            "source_file" | "mod_item" | "impl_item" => return None,
            _ => current = p.parent(),
        }
    }
    None
}

/// `pub`, `pub(crate)` and `pub(super)` count as public; `pub(self)` and no
/// modifier do not. Trait-impl methods implement a contract and are always
/// public; trait-definition methods inherit the trait's visibility.
fn is_public(node: Node, doc: &SourceDocument) -> bool {
    if node.kind() == "function_item" {
        if is_in_trait_impl(node, doc) {
            return true;
        }
        if let Some(tr) = parent_trait(node) {
            return is_public(tr, doc);
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "visibility_modifier" {
            let text = doc.node_text(child);
            if text.contains("pub(self)") {
                return false;
            }
            return text.trim_start().starts_with("pub");
        }
    }
    false
}

fn top_level_fn(node: Node, _doc: &SourceDocument) -> bool {
    !inside_impl_or_trait(node)
}

fn method_fn(node: Node, _doc: &SourceDocument) -> bool {
    inside_impl_or_trait(node)
}

fn inside_impl_or_trait(node: Node) -> bool {
    let mut current = node.parent();
    while let Some(p) = current {
        match p.kind() {
            "impl_item" | "trait_item" => return true,
            "source_file" => return false,
            _ => current = p.parent(),
        }
    }
    false
}

static PROFILES: &[ElementProfile] = &[
    ElementProfile {
        name: "struct",
        query: "(struct_item) @element",
        is_public: Some(is_public),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "enum",
        query: "(enum_item) @element",
        is_public: Some(is_public),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "trait",
        query: "(trait_item) @element",
        is_public: Some(is_public),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "function",
        query: "(function_item) @element",
        is_public: Some(is_public),
        additional_check: Some(top_level_fn),
        has_body: true,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "method",
        query: "",
        is_public: None,
        additional_check: Some(method_fn),
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: true,
    },
    ElementProfile {
        name: "constant",
        query: "(const_item) @element",
        is_public: Some(is_public),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "constant",
        query: "(static_item) @element",
        is_public: Some(is_public),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
];

pub static CODE_DESCRIPTOR: LanguageCodeDescriptor = LanguageCodeDescriptor {
    language: "rust",
    profiles: PROFILES,
    decorator_types: &["attribute_item"],
    comment_types: &["line_comment", "block_comment"],
    name_extractor: None,
    extend_element_range: None,
};

// --- literal patterns ---

fn string_opening(text: &str) -> String {
    let t = text.trim();
    if let Some(rest) = t.strip_prefix('r') {
        let hashes = rest.bytes().take_while(|b| *b == b'#').count();
        return format!("r{}\"", "#".repeat(hashes));
    }
    if t.starts_with("b\"") {
        return "b\"".to_string();
    }
    "\"".to_string()
}

fn string_closing(text: &str) -> String {
    let t = text.trim();
    if t.starts_with('r') {
        let hashes = t[1..].bytes().take_while(|b| *b == b'#').count();
        return format!("\"{}", "#".repeat(hashes));
    }
    "\"".to_string()
}

static PATTERNS: &[LiteralPattern] = &[
    LiteralPattern {
        category: LiteralCategory::String,
        ast_types: &["string_literal", "raw_string_literal"],
        opening: Delim::Dynamic(string_opening),
        closing: Delim::Dynamic(string_closing),
        placeholder_position: PlaceholderPosition::Inline,
        placeholder_template: "…",
        ..LiteralPattern::defaults(LiteralCategory::String)
    },
    LiteralPattern {
        category: LiteralCategory::Sequence,
        ast_types: &["array_expression"],
        opening: Delim::Fixed("["),
        closing: Delim::Fixed("]"),
        placeholder_position: PlaceholderPosition::End,
        placeholder_template: "\"…\"",
        comment_name: Some("array"),
        ..LiteralPattern::defaults(LiteralCategory::Sequence)
    },
    // vec![...] keeps its wrapper; other macros are left alone.
    LiteralPattern {
        category: LiteralCategory::FactoryCall,
        ast_types: &["macro_invocation"],
        opening: Delim::Fixed("["),
        closing: Delim::Fixed("]"),
        placeholder_position: PlaceholderPosition::End,
        placeholder_template: "\"…\"",
        comment_name: Some("vec"),
        wrapper_match: Some(r"^vec!$"),
        ..LiteralPattern::defaults(LiteralCategory::FactoryCall)
    },
];

pub static LITERAL_DESCRIPTOR: LanguageLiteralDescriptor = LanguageLiteralDescriptor {
    language: "rust",
    patterns: PATTERNS,
};

// --- language services ---

/// Crate-internal paths are local; external crates and std are not.
pub fn is_local_import(text: &str) -> bool {
    let t = text.trim_start();
    let Some(rest) = t.strip_prefix("use ") else {
        return false;
    };
    let rest = rest.trim_start();
    rest.starts_with("crate::")
        || rest.starts_with("self::")
        || rest.starts_with("super::")
}

fn language_for(_ext: &str) -> Language {
    tree_sitter_rust::language()
}

pub static SPEC: LanguageSpec = LanguageSpec {
    name: "rust",
    extensions: &[".rs"],
    fence: "rust",
    language_for,
    queries: QUERIES,
    code: &CODE_DESCRIPTOR,
    literals: &LITERAL_DESCRIPTOR,
    comment_single: "//",
    comment_block: ("/*", "*/"),
    doc_comment_prefixes: &["///", "//!", "/**"],
    body_stub_braces: true,
    is_local_import,
    is_docstring: None,
};
