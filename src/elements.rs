use std::collections::HashSet;

use tree_sitter::Node;

use crate::document::SourceDocument;
use crate::errors::Result;

pub type NodePredicate = for<'t> fn(Node<'t>, &SourceDocument) -> bool;
pub type NameExtractor = for<'t> fn(Node<'t>, &SourceDocument) -> Option<String>;
pub type NodeResolver = for<'t> fn(Node<'t>, &SourceDocument) -> Option<Node<'t>>;
pub type RangeExtender = for<'t> fn(Node<'t>, &str, &SourceDocument) -> (usize, usize);

/// Declarative description of one element type (class, function, method...).
///
/// `query` must be a single-pattern query capturing `@element`. A profile
/// with `inherit_previous` fills its empty/None fields from the preceding
/// profile, so "method" variants can reuse the "function" query and only
/// swap the disambiguating check.
#[derive(Clone, Copy, Default)]
pub struct ElementProfile {
    pub name: &'static str,
    pub query: &'static str,
    /// None = always public.
    pub is_public: Option<NodePredicate>,
    /// AST disambiguation when the query alone is too broad.
    pub additional_check: Option<NodePredicate>,
    pub has_body: bool,
    /// Locates the strippable body node; None falls back to the `body`
    /// field / well-known block child kinds.
    pub body_resolver: Option<NodeResolver>,
    /// Extracts the docstring node to preserve when stripping a body.
    pub docstring_extractor: Option<NodeResolver>,
    pub inherit_previous: bool,
}

/// All element profiles plus language-wide utilities.
#[derive(Clone, Copy)]
pub struct LanguageCodeDescriptor {
    pub language: &'static str,
    pub profiles: &'static [ElementProfile],
    pub decorator_types: &'static [&'static str],
    pub comment_types: &'static [&'static str],
    pub name_extractor: Option<NameExtractor>,
    /// Widens an element to trailing punctuation (e.g. the `;` after a
    /// TypeScript field) so adjacent-removal grouping stays seamless.
    pub extend_element_range: Option<RangeExtender>,
}

/// A discovered code element, byte-addressed into the document.
#[derive(Debug, Clone)]
pub struct CodeElement {
    pub kind: String,
    pub name: Option<String>,
    /// Full range including decorators and trailing punctuation.
    pub range: (usize, usize),
    /// The bare element node.
    pub node_range: (usize, usize),
    pub line_range: (usize, usize),
    pub is_public: bool,
    pub has_body: bool,
    pub body_range: Option<(usize, usize)>,
    pub docstring_range: Option<(usize, usize)>,
    pub decorators: Vec<(usize, usize)>,
}

impl CodeElement {
    pub fn line_count(&self) -> usize {
        self.line_range.1 - self.line_range.0 + 1
    }
}

/// Collect all elements described by the descriptor's profiles.
pub fn collect(doc: &SourceDocument, descriptor: &LanguageCodeDescriptor) -> Result<Vec<CodeElement>> {
    let profiles = resolve_inheritance(descriptor.profiles);
    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut out: Vec<CodeElement> = Vec::new();

    for profile in &profiles {
        if profile.query.is_empty() {
            continue;
        }
        for (node, capture) in doc.run_query(profile.query)? {
            if capture != "element" {
                continue;
            }
            if let Some(check) = profile.additional_check {
                if !check(node, doc) {
                    continue;
                }
            }
            if !seen.insert((node.start_byte(), node.end_byte())) {
                continue;
            }

            out.push(build_element(doc, descriptor, profile, node));
        }
    }

    out.sort_by_key(|e| (e.range.0, e.range.1));
    Ok(out)
}

fn build_element(
    doc: &SourceDocument,
    descriptor: &LanguageCodeDescriptor,
    profile: &ElementProfile,
    node: Node,
) -> CodeElement {
    let name = match descriptor.name_extractor {
        Some(f) => f(node, doc),
        None => default_name(node, doc),
    };
    let is_public = profile.is_public.map(|f| f(node, doc)).unwrap_or(true);

    let decorators = find_decorators(node, descriptor.decorator_types);
    let node_range = doc.node_range(node);

    let mut range = node_range;
    for d in &decorators {
        range.0 = range.0.min(d.0);
    }
    if let Some(extend) = descriptor.extend_element_range {
        let extended = extend(node, profile.name, doc);
        range.0 = range.0.min(extended.0);
        range.1 = range.1.max(extended.1);
    }

    let (body_range, docstring_range) = if profile.has_body {
        let body = match profile.body_resolver {
            Some(f) => f(node, doc),
            None => default_body(node),
        };
        let body_range = body.map(|b| doc.node_range(b));
        let docstring_range = match (body, profile.docstring_extractor) {
            (Some(b), Some(f)) => f(b, doc).map(|d| doc.node_range(d)),
            _ => None,
        };
        (body_range, docstring_range)
    } else {
        (None, None)
    };

    let start_line = doc.line_number(range.0);
    let end_line = doc.line_number(range.1.saturating_sub(1).max(range.0));

    CodeElement {
        kind: profile.name.to_string(),
        name,
        range,
        node_range,
        line_range: (start_line, end_line),
        is_public,
        has_body: profile.has_body,
        body_range,
        docstring_range,
        decorators,
    }
}

fn resolve_inheritance(profiles: &[ElementProfile]) -> Vec<ElementProfile> {
    let mut out: Vec<ElementProfile> = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let mut p = *profile;
        if p.inherit_previous {
            if let Some(prev) = out.last() {
                if p.name.is_empty() {
                    p.name = prev.name;
                }
                if p.query.is_empty() {
                    p.query = prev.query;
                }
                if p.is_public.is_none() {
                    p.is_public = prev.is_public;
                }
                if p.additional_check.is_none() {
                    p.additional_check = prev.additional_check;
                }
                if !p.has_body {
                    p.has_body = prev.has_body;
                }
                if p.body_resolver.is_none() {
                    p.body_resolver = prev.body_resolver;
                }
                if p.docstring_extractor.is_none() {
                    p.docstring_extractor = prev.docstring_extractor;
                }
            }
        }
        out.push(p);
    }
    out
}

fn default_name(node: Node, doc: &SourceDocument) -> Option<String> {
    if let Some(name_node) = node.child_by_field_name("name") {
        return Some(doc.node_text(name_node).to_string());
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(child.kind(), "identifier" | "type_identifier") {
            return Some(doc.node_text(child).to_string());
        }
    }
    None
}

fn default_body<'t>(node: Node<'t>) -> Option<Node<'t>> {
    if let Some(body) = node.child_by_field_name("body") {
        return Some(body);
    }
    let mut cursor = node.walk();
    let result = node.children(&mut cursor).find(|child| {
        matches!(
            child.kind(),
            "block" | "statement_block" | "declaration_list" | "field_declaration_list"
        )
    });
    result
}

fn find_decorators(node: Node, decorator_types: &[&str]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();

    // Wrapper node (Python's decorated_definition): decorators are siblings
    // preceding the element inside the wrapper.
    if let Some(parent) = node.parent() {
        if parent.kind() == "decorated_definition" {
            let mut cursor = parent.walk();
            for child in parent.children(&mut cursor) {
                if child.id() == node.id() {
                    break;
                }
                if decorator_types.contains(&child.kind()) {
                    out.push((child.start_byte(), child.end_byte()));
                }
            }
            return out;
        }
    }

    // Plain preceding siblings (TS decorators, Rust attributes).
    let mut prev = node.prev_sibling();
    while let Some(p) = prev {
        if decorator_types.contains(&p.kind()) {
            out.push((p.start_byte(), p.end_byte()));
            prev = p.prev_sibling();
        } else {
            break;
        }
    }
    out.reverse();
    out
}

/// True when `node` sits anywhere inside one of the container kinds.
pub fn is_inside_container(node: Node, kinds: &[&str]) -> bool {
    let mut current = node.parent();
    while let Some(p) = current {
        if kinds.contains(&p.kind()) {
            return true;
        }
        current = p.parent();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::langs;

    fn collect_python(text: &str) -> Vec<CodeElement> {
        let doc = SourceDocument::parse(
            text.to_string(),
            tree_sitter_python::language(),
            langs::python::QUERIES,
        )
        .unwrap();
        collect(&doc, &langs::python::CODE_DESCRIPTOR).unwrap()
    }

    #[test]
    fn distinguishes_functions_from_methods() {
        let els = collect_python(
            "def top():\n    pass\n\nclass C:\n    def meth(self):\n        pass\n",
        );
        let kinds: Vec<(&str, &str)> = els
            .iter()
            .map(|e| (e.kind.as_str(), e.name.as_deref().unwrap_or("")))
            .collect();
        assert!(kinds.contains(&("function", "top")));
        assert!(kinds.contains(&("method", "meth")));
        assert!(kinds.contains(&("class", "C")));
    }

    #[test]
    fn visibility_follows_underscore_convention() {
        let els = collect_python("def pub():\n    pass\n\ndef _priv():\n    pass\n");
        let by_name = |n: &str| els.iter().find(|e| e.name.as_deref() == Some(n)).unwrap();
        assert!(by_name("pub").is_public);
        assert!(!by_name("_priv").is_public);
    }

    #[test]
    fn docstring_range_is_found() {
        let els = collect_python("def f():\n    \"\"\"doc\"\"\"\n    return 1\n");
        let f = els.iter().find(|e| e.kind == "function").unwrap();
        assert!(f.body_range.is_some());
        assert!(f.docstring_range.is_some());
    }

    #[test]
    fn decorators_extend_element_range() {
        let text = "@deco\ndef f():\n    pass\n";
        let els = collect_python(text);
        let f = els.iter().find(|e| e.kind == "function").unwrap();
        assert_eq!(f.range.0, 0);
        assert_eq!(f.decorators.len(), 1);
    }
}
