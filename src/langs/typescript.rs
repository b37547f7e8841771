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
        (template_string) @string
        (array) @sequence
        (object) @mapping
        (object_type) @mapping
        "#,
    ),
    ("comments", "(comment) @comment"),
    ("imports", "(import_statement) @import"),
];

// --- element profiles ---

/// Top-level declarations are public when exported.
fn is_exported(node: Node, _doc: &SourceDocument) -> bool {
    let mut current = node.parent();
    while let Some(p) = current {
        match p.kind() {
            "export_statement" => return true,
            "program" => return false,
            _ => current = p.parent(),
        }
    }
    false
}

/// Class members are public without `private`/`protected` and without a
/// `#name`.
fn member_is_public(node: Node, doc: &SourceDocument) -> bool {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "accessibility_modifier" => {
                let text = doc.node_text(child);
                if text == "private" || text == "protected" {
                    return false;
                }
            }
            "property_identifier" | "private_property_identifier" => {
                if doc.node_text(child).starts_with('#') {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

fn not_in_class(node: Node, _doc: &SourceDocument) -> bool {
    !is_inside_container(node, &["class_declaration", "class"])
}

static PROFILES: &[ElementProfile] = &[
    ElementProfile {
        name: "class",
        query: "(class_declaration) @element",
        is_public: Some(is_exported),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "interface",
        query: "(interface_declaration) @element",
        is_public: Some(is_exported),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "type",
        query: "(type_alias_declaration) @element",
        is_public: Some(is_exported),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "enum",
        query: "(enum_declaration) @element",
        is_public: Some(is_exported),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "function",
        query: "(function_declaration) @element",
        is_public: Some(is_exported),
        additional_check: Some(not_in_class),
        has_body: true,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "method",
        query: "(method_definition) @element",
        is_public: Some(member_is_public),
        additional_check: None,
        has_body: true,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "field",
        query: "(public_field_definition) @element",
        is_public: Some(member_is_public),
        additional_check: None,
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
    ElementProfile {
        name: "variable",
        query: "(lexical_declaration) @element",
        is_public: Some(is_exported),
        additional_check: Some(top_level_variable),
        has_body: false,
        body_resolver: None,
        docstring_extractor: None,
        inherit_previous: false,
    },
];

fn top_level_variable(node: Node, _doc: &SourceDocument) -> bool {
    !is_inside_container(
        node,
        &[
            "class_declaration",
            "class",
            "function_declaration",
            "method_definition",
            "arrow_function",
            "function_expression",
        ],
    )
}

/// Take the trailing `;` with the element so grouped removals stay clean.
fn extend_with_semicolon(node: Node, _kind: &str, doc: &SourceDocument) -> (usize, usize) {
    let (start, mut end) = doc.node_range(node);
    if doc.text()[end..].starts_with(';') {
        end += 1;
    }
    (start, end)
}

pub static CODE_DESCRIPTOR: LanguageCodeDescriptor = LanguageCodeDescriptor {
    language: "typescript",
    profiles: PROFILES,
    decorator_types: &["decorator"],
    comment_types: &["comment"],
    name_extractor: None,
    extend_element_range: Some(extend_with_semicolon),
};

// --- literal patterns ---

fn string_opening(text: &str) -> String {
    match text.trim_start().chars().next() {
        Some('`') => "`".to_string(),
        Some('\'') => "'".to_string(),
        _ => "\"".to_string(),
    }
}

fn string_closing(text: &str) -> String {
    match text.trim_end().chars().last() {
        Some('`') => "`".to_string(),
        Some('\'') => "'".to_string(),
        _ => "\"".to_string(),
    }
}

const TS_INTERPOLATION: &[InterpolationMarker] = &[InterpolationMarker {
    prefix: "$",
    open: "{",
    close: "}",
}];

static PATTERNS: &[LiteralPattern] = &[
    LiteralPattern {
        category: LiteralCategory::String,
        ast_types: &["template_string"],
        opening: Delim::Fixed("`"),
        closing: Delim::Fixed("`"),
        placeholder_position: PlaceholderPosition::Inline,
        placeholder_template: "…",
        preserve_whitespace: true,
        priority: 10,
        interpolation_markers: TS_INTERPOLATION,
        ..LiteralPattern::defaults(LiteralCategory::String)
    },
    LiteralPattern {
        category: LiteralCategory::String,
        ast_types: &["string"],
        opening: Delim::Dynamic(string_opening),
        closing: Delim::Dynamic(string_closing),
        placeholder_position: PlaceholderPosition::Inline,
        placeholder_template: "…",
        ..LiteralPattern::defaults(LiteralCategory::String)
    },
    LiteralPattern {
        category: LiteralCategory::Sequence,
        ast_types: &["array"],
        opening: Delim::Fixed("["),
        closing: Delim::Fixed("]"),
        placeholder_position: PlaceholderPosition::End,
        placeholder_template: "\"…\"",
        comment_name: Some("array"),
        ..LiteralPattern::defaults(LiteralCategory::Sequence)
    },
    LiteralPattern {
        category: LiteralCategory::Mapping,
        ast_types: &["object"],
        opening: Delim::Fixed("{"),
        closing: Delim::Fixed("}"),
        kv_separator: Some(":"),
        placeholder_position: PlaceholderPosition::MiddleComment,
        placeholder_template: "\"…\": \"…\"",
        comment_name: Some("object"),
        ..LiteralPattern::defaults(LiteralCategory::Mapping)
    },
    // Interface/type-literal members use `;` separators.
    LiteralPattern {
        category: LiteralCategory::Mapping,
        ast_types: &["object_type"],
        opening: Delim::Fixed("{"),
        closing: Delim::Fixed("}"),
        separator: ";",
        kv_separator: Some(":"),
        placeholder_position: PlaceholderPosition::End,
        placeholder_template: "\"…\": \"…\"",
        comment_name: Some("object type"),
        ..LiteralPattern::defaults(LiteralCategory::Mapping)
    },
];

pub static LITERAL_DESCRIPTOR: LanguageLiteralDescriptor = LanguageLiteralDescriptor {
    language: "typescript",
    patterns: PATTERNS,
};

// --- language services ---

/// `./` and `../` sources are local; bare or scoped package names are not.
pub fn is_local_import(text: &str) -> bool {
    for quote in ['"', '\'', '`'] {
        if let Some(pos) = text.find(quote) {
            return text[pos + 1..].starts_with('.');
        }
    }
    false
}

fn language_for(ext: &str) -> Language {
    if ext == ".tsx" || ext == ".jsx" {
        tree_sitter_typescript::language_tsx()
    } else {
        // JS shares the TypeScript grammar for our purposes.
        tree_sitter_typescript::language_typescript()
    }
}

pub static SPEC: LanguageSpec = LanguageSpec {
    name: "typescript",
    extensions: &[".ts", ".tsx", ".mts", ".cts", ".js", ".jsx", ".mjs", ".cjs"],
    fence: "typescript",
    language_for,
    queries: QUERIES,
    code: &CODE_DESCRIPTOR,
    literals: &LITERAL_DESCRIPTOR,
    comment_single: "//",
    comment_block: ("/*", "*/"),
    doc_comment_prefixes: &["/**"],
    body_stub_braces: true,
    is_local_import,
    is_docstring: None,
};
