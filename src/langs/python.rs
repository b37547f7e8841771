use tree_sitter::{Language, Node};

use crate::document::SourceDocument;
use crate::elements::{is_inside_container, ElementProfile, LanguageCodeDescriptor};
use crate::optimize::literals::{
    Delim, InterpolationMarker, LanguageLiteralDescriptor, LiteralCategory, LiteralPattern,
    PlaceholderPosition,
};

use super::LanguageSpec;

pub const QUERIES: &[(&str, &str)] = &[
    (
        "literals",
        r#"
        (string) @string
        (list) @sequence
        (set) @sequence
        (tuple) @sequence
        (dictionary) @mapping
        "#,
    ),
    ("comments", "(comment) @comment"),
    (
        "imports",
        r#"
        (import_statement) @import
        (import_from_statement) @import
        "#,
    ),
];

// --- element profiles ---

fn extract_name(node: Node, doc: &SourceDocument) -> Option<String> {
    if node.kind() == "assignment" {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "identifier" {
                return Some(doc.node_text(child).to_string());
            }
        }
    }
    if let Some(name) = node.child_by_field_name("name") {
        return Some(doc.node_text(name).to_string());
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "identifier" {
            return Some(doc.node_text(child).to_string());
        }
    }
    None
}

/// `_name` and `__name` are private; dunders are public.
fn is_public(node: Node, doc: &SourceDocument) -> bool {
    let Some(name) = extract_name(node, doc) else {
        return true;
    };
    if name.starts_with("__") && name.ends_with("__") {
        return true;
    }
    !name.starts_with('_')
}

fn not_in_class(node: Node, _doc: &SourceDocument) -> bool {
    !is_inside_container(node, &["class_definition"])
}

fn in_class(node: Node, _doc: &SourceDocument) -> bool {
    is_inside_container(node, &["class_definition"])
}

fn top_level_only(node: Node, _doc: &SourceDocument) -> bool {
    !is_inside_container(node, &["class_definition", "function_definition"])
}

/// First expression statement of the body, when it is a bare string.
fn find_docstring<'t>(body: Node<'t>, _doc: &SourceDocument) -> Option<Node<'t>> {
    let mut cursor = body.walk();
    for child in body.children(&mut cursor) {
        if child.kind() == "expression_statement" {
            let mut inner = child.walk();
            if child.children(&mut inner).any(|c| c.kind() == "string") {
                return Some(child);
            }
            return None;
        }
        if child.kind() != "comment" {
            return None;
        }
    }
    None
}

static PROFILES: &[ElementProfile] = &[
    ElementProfile {
        name: "class",
        query: "(class_definition) @element",
        is_public: Some(is_public),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "function",
        query: "(function_definition) @element",
        is_public: Some(is_public),
        additional_check: Some(not_in_class),
        has_body: true,
        body_resolver: None,
        docstring_extractor: Some(find_docstring),
        inherit_previous: false,
    },
    // Same query and body handling as functions; only the container check
    // differs.
    ElementProfile {
        name: "method",
        query: "",
        is_public: None,
        additional_check: Some(in_class),
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: true,
    },
    ElementProfile {
        name: "variable",
        query: "(assignment) @element",
        is_public: Some(is_public),
        additional_check: Some(top_level_only),
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
];

pub static CODE_DESCRIPTOR: LanguageCodeDescriptor = LanguageCodeDescriptor {
    language: "python",
    profiles: PROFILES,
    decorator_types: &["decorator"],
    comment_types: &["comment"],
    name_extractor: Some(extract_name),
    extend_element_range: None,
};

// --- literal patterns ---

fn string_opening(text: &str) -> String {
    let t = text.trim();
    let prefix_len = t
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .count();
    let (prefix, rest) = t.split_at(prefix_len);
    for q in ["\"\"\"", "'''", "\"", "'"] {
        if rest.starts_with(q) {
            return format!("{prefix}{q}");
        }
    }
    format!("{prefix}\"")
}

fn string_closing(text: &str) -> String {
    let t = text.trim();
    for q in ["\"\"\"", "'''", "\"", "'"] {
        if t.ends_with(q) {
            return q.to_string();
        }
    }
    "\"".to_string()
}

/// f-string `{...}` fields must never be cut mid-span.
const PY_INTERPOLATION: &[InterpolationMarker] = &[InterpolationMarker {
    prefix: "",
    open: "{",
    close: "}",
}];

static PATTERNS: &[LiteralPattern] = &[
    LiteralPattern {
        category: LiteralCategory::String,
        ast_types: &["string"],
        opening: Delim::Dynamic(string_opening),
        closing: Delim::Dynamic(string_closing),
        placeholder_position: PlaceholderPosition::Inline,
        placeholder_template: "…",
        interpolation_markers: PY_INTERPOLATION,
        ..LiteralPattern::defaults(LiteralCategory::String)
    },
    LiteralPattern {
        category: LiteralCategory::Sequence,
        ast_types: &["list", "set", "tuple"],
        opening: Delim::Dynamic(collection_opening),
        closing: Delim::Dynamic(collection_closing),
        placeholder_position: PlaceholderPosition::End,
        placeholder_template: "\"…\"",
        comment_name: Some("list"),
        ..LiteralPattern::defaults(LiteralCategory::Sequence)
    },
    LiteralPattern {
        category: LiteralCategory::Mapping,
        ast_types: &["dictionary"],
        opening: Delim::Fixed("{"),
        closing: Delim::Fixed("}"),
        kv_separator: Some(":"),
        placeholder_position: PlaceholderPosition::MiddleComment,
        placeholder_template: "\"…\": \"…\"",
        comment_name: Some("dict"),
        ..LiteralPattern::defaults(LiteralCategory::Mapping)
    },
];

fn collection_opening(text: &str) -> String {
    match text.trim_start().chars().next() {
        Some('(') => "(".to_string(),
        Some('{') => "{".to_string(),
        _ => "[".to_string(),
    }
}

fn collection_closing(text: &str) -> String {
    match text.trim_end().chars().last() {
        Some(')') => ")".to_string(),
        Some('}') => "}".to_string(),
        _ => "]".to_string(),
    }
}

pub static LITERAL_DESCRIPTOR: LanguageLiteralDescriptor = LanguageLiteralDescriptor {
    language: "python",
    patterns: PATTERNS,
};

// --- language services ---

/// Relative imports (`from .x import y`, `from ..`) are local.
pub fn is_local_import(text: &str) -> bool {
    let t = text.trim_start();
    t.starts_with("from .") || t.starts_with("import .")
}

/// A string is a docstring when its expression statement opens a module,
/// class or function body.
pub fn is_docstring(node: Node, _doc: &SourceDocument) -> bool {
    let Some(stmt) = node.parent() else {
        return false;
    };
    if stmt.kind() != "expression_statement" {
        return false;
    }
    let Some(container) = stmt.parent() else {
        return false;
    };
    if !matches!(container.kind(), "module" | "block") {
        return false;
    }
    let mut cursor = container.walk();
    for child in container.children(&mut cursor) {
        if child.kind() == "comment" {
            continue;
        }
        return child.id() == stmt.id();
    }
    false
}

fn language_for(_ext: &str) -> Language {
    tree_sitter_python::language()
}

pub static SPEC: LanguageSpec = LanguageSpec {
    name: "python",
    extensions: &[".py"],
    fence: "python",
    language_for,
    queries: QUERIES,
    code: &CODE_DESCRIPTOR,
    literals: &LITERAL_DESCRIPTOR,
    comment_single: "#",
    comment_block: ("#", ""),
    doc_comment_prefixes: &[],
    body_stub_braces: false,
    is_local_import,
    is_docstring: Some(is_docstring),
};
