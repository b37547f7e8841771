pub mod formatter;
pub mod parser;
pub mod selector;

use regex::Regex;

use crate::document::SourceDocument;
use crate::editor::EditBuffer;
use crate::elements::NodePredicate;
use crate::errors::Result;
use crate::optimize::Metrics;
use crate::tokenizer::TokenService;

use formatter::{FormattedResult, ResultFormatter};
use parser::{ElementParser, ParseConfig};
use selector::BudgetSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralCategory {
    String,
    Sequence,
    Mapping,
    FactoryCall,
    BlockInit,
}

impl LiteralCategory {
    pub fn label(&self) -> &'static str {
        match self {
            LiteralCategory::String => "string",
            LiteralCategory::Sequence => "sequence",
            LiteralCategory::Mapping => "mapping",
            LiteralCategory::FactoryCall => "factory",
            LiteralCategory::BlockInit => "block",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderPosition {
    /// Placeholder becomes the last element.
    End,
    /// `… (K more, −T tokens)` emitted inside the literal.
    MiddleComment,
    /// Truncation marker inside the string itself.
    Inline,
    /// Silent trim.
    None,
}

/// Opening/closing delimiter: fixed, or detected from the literal text
/// (Python needs `"""` vs `'` vs `f"`...).
#[derive(Clone, Copy)]
pub enum Delim {
    Fixed(&'static str),
    Dynamic(fn(&str) -> String),
}

impl Delim {
    pub fn get(&self, text: &str) -> String {
        match self {
            Delim::Fixed(s) => (*s).to_string(),
            Delim::Dynamic(f) => f(text),
        }
    }
}

/// `${...}`-style span that truncation must never cut through.
#[derive(Clone, Copy)]
pub struct InterpolationMarker {
    pub prefix: &'static str,
    pub open: &'static str,
    pub close: &'static str,
}

/// Declarative description of one literal shape in a language.
#[derive(Clone, Copy)]
pub struct LiteralPattern {
    pub category: LiteralCategory,
    pub ast_types: &'static [&'static str],
    pub opening: Delim,
    pub closing: Delim,
    pub separator: &'static str,
    pub kv_separator: Option<&'static str>,
    pub placeholder_position: PlaceholderPosition,
    pub placeholder_template: &'static str,
    pub min_elements: usize,
    pub preserve_whitespace: bool,
    /// Higher priority patterns are checked first.
    pub priority: i32,
    /// Overrides the category label in trailing comments.
    pub comment_name: Option<&'static str>,
    pub interpolation_markers: &'static [InterpolationMarker],
    /// Wrappers whose parenthesized payload parses as nested structure.
    pub factory_wrappers: &'static [&'static str],
    /// Regex the detected wrapper must match (factory calls only).
    pub wrapper_match: Option<&'static str>,
    /// Max char length for a retained nested structure to stay inline.
    pub nested_inline_threshold: usize,
}

impl LiteralPattern {
    pub const fn defaults(category: LiteralCategory) -> Self {
        Self {
            category,
            ast_types: &[],
            opening: Delim::Fixed("["),
            closing: Delim::Fixed("]"),
            separator: ",",
            kv_separator: None,
            placeholder_position: PlaceholderPosition::End,
            placeholder_template: "\"…\"",
            min_elements: 1,
            preserve_whitespace: false,
            priority: 0,
            comment_name: None,
            interpolation_markers: &[],
            factory_wrappers: &[],
            wrapper_match: None,
            nested_inline_threshold: 60,
        }
    }
}

pub struct LanguageLiteralDescriptor {
    pub language: &'static str,
    pub patterns: &'static [LiteralPattern],
}

impl LanguageLiteralDescriptor {
    /// Highest-priority pattern covering a tree-sitter node type.
    pub fn pattern_for(&self, ast_type: &str) -> Option<&LiteralPattern> {
        self.patterns
            .iter()
            .filter(|p| p.ast_types.contains(&ast_type))
            .max_by_key(|p| p.priority)
    }
}

/// A literal parsed out of source, ready for selection and formatting.
pub struct ParsedLiteral<'p> {
    pub original_text: String,
    pub byte_range: (usize, usize),
    pub category: LiteralCategory,
    pub pattern: &'p LiteralPattern,
    pub opening: String,
    pub closing: String,
    pub content: String,
    pub is_multiline: bool,
    pub base_indent: String,
    pub element_indent: String,
    pub wrapper: Option<String>,
    pub original_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct TrimResult {
    pub trimmed_text: String,
    pub original_tokens: usize,
    pub trimmed_tokens: usize,
    pub saved_tokens: usize,
    pub elements_kept: usize,
    pub elements_removed: usize,
    pub comment_text: Option<String>,
}

/// Coordinates detection, parsing, selection and formatting for one
/// language's literals.
pub struct LiteralHandler<'a> {
    pub descriptor: &'static LanguageLiteralDescriptor,
    tokenizer: &'a TokenService,
    selector: BudgetSelector<'a>,
    formatter: ResultFormatter,
}

impl<'a> LiteralHandler<'a> {
    pub fn new(
        descriptor: &'static LanguageLiteralDescriptor,
        tokenizer: &'a TokenService,
        single_comment: &'static str,
        block_comment: (&'static str, &'static str),
    ) -> Self {
        Self {
            descriptor,
            tokenizer,
            selector: BudgetSelector::new(tokenizer),
            formatter: ResultFormatter::new(single_comment, block_comment),
        }
    }

    pub fn detects(&self, ast_type: &str) -> bool {
        self.descriptor.pattern_for(ast_type).is_some()
    }

    pub fn parse_literal(
        &self,
        text: &str,
        ast_type: &str,
        byte_range: (usize, usize),
        base_indent: &str,
        element_indent: &str,
    ) -> Option<ParsedLiteral<'_>> {
        let pattern = self.descriptor.pattern_for(ast_type)?;
        let opening = pattern.opening.get(text);
        let closing = pattern.closing.get(text);
        let content = extract_content(text, &opening, &closing)?;

        let wrapper = if pattern.category == LiteralCategory::FactoryCall {
            detect_wrapper(text, &opening)
        } else {
            None
        };
        if let Some(expr) = pattern.wrapper_match {
            let wrapper_text = wrapper.as_deref().unwrap_or("");
            let re = Regex::new(expr).ok()?;
            if !re.is_match(wrapper_text) {
                return None;
            }
        }

        let element_indent = if element_indent.is_empty() {
            format!("{base_indent}    ")
        } else {
            element_indent.to_string()
        };

        Some(ParsedLiteral {
            original_text: text.to_string(),
            byte_range,
            category: pattern.category,
            pattern,
            opening,
            closing,
            content,
            is_multiline: text.contains('\n'),
            base_indent: base_indent.to_string(),
            element_indent,
            wrapper,
            original_tokens: self.tokenizer.count(text),
        })
    }

    pub fn process(&self, parsed: &ParsedLiteral, budget: usize) -> Option<TrimResult> {
        if parsed.original_tokens <= budget {
            return None;
        }
        match parsed.category {
            LiteralCategory::String => self.process_string(parsed, budget),
            _ => self.process_collection_dfs(parsed, budget),
        }
    }

    fn process_string(&self, parsed: &ParsedLiteral, budget: usize) -> Option<TrimResult> {
        let overhead = self.selector.calculate_overhead(
            &parsed.opening,
            &parsed.closing,
            "…",
            parsed.is_multiline,
            &parsed.element_indent,
        );
        let content_budget = budget.saturating_sub(overhead).max(1);

        let truncated = safe_truncate(
            self.tokenizer,
            &parsed.content,
            content_budget,
            parsed.pattern.interpolation_markers,
        );
        if truncated.len() >= parsed.content.len() {
            return None;
        }

        let text = self.formatter.format_string(parsed, &truncated);
        let trimmed_tokens = self.tokenizer.count(&text);
        let saved = parsed.original_tokens.saturating_sub(trimmed_tokens);
        if saved == 0 {
            return None;
        }

        let content_saved = parsed
            .original_tokens
            .saturating_sub(self.tokenizer.count(&truncated));
        Some(TrimResult {
            trimmed_text: text,
            original_tokens: parsed.original_tokens,
            trimmed_tokens,
            saved_tokens: saved,
            elements_kept: 1,
            elements_removed: 1,
            comment_text: Some(self.formatter.string_comment(parsed, content_saved)),
        })
    }

    fn process_collection_dfs(&self, parsed: &ParsedLiteral, budget: usize) -> Option<TrimResult> {
        assert!(
            parsed.category != LiteralCategory::String,
            "string literals cannot use DFS selection; check the {} literal descriptor",
            self.descriptor.language
        );
        let pattern = parsed.pattern;
        let parser = ElementParser::new(ParseConfig {
            separator: pattern.separator,
            kv_separator: pattern.kv_separator,
            factory_wrappers: pattern.factory_wrappers.to_vec(),
            ..ParseConfig::default()
        });

        let elements = parser.parse(&parsed.content);
        if elements.is_empty() {
            return None;
        }

        let overhead = self.selector.calculate_overhead(
            &parsed.opening,
            &parsed.closing,
            pattern.placeholder_template,
            parsed.is_multiline,
            &parsed.element_indent,
        );
        let content_budget = budget.saturating_sub(overhead).max(10);

        let selection =
            self.selector
                .select_dfs(elements, content_budget, &parser, pattern.min_elements);
        if !selection.has_removals() {
            return None;
        }

        let FormattedResult { text, comment } =
            self.formatter.format_collection(parsed, &selection, &parser);
        let trimmed_tokens = self.tokenizer.count(&text);
        let saved = parsed.original_tokens.saturating_sub(trimmed_tokens);
        if saved == 0 {
            return None;
        }

        Some(TrimResult {
            trimmed_text: text,
            original_tokens: parsed.original_tokens,
            trimmed_tokens,
            saved_tokens: saved,
            elements_kept: selection.kept.len(),
            elements_removed: selection.total_removed_count(),
            comment_text: comment,
        })
    }

    pub fn comment_for_context(&self, text_after: &str, content: &str) -> (String, usize) {
        self.formatter.comment_for_context(text_after, content)
    }
}

fn extract_content(text: &str, opening: &str, closing: &str) -> Option<String> {
    let mut stripped = text.trim();
    if !stripped.starts_with(opening) {
        let pos = stripped.find(opening)?;
        stripped = &stripped[pos..];
    }
    if !stripped.starts_with(opening) || !stripped.ends_with(closing) {
        return None;
    }
    if stripped.len() < opening.len() + closing.len() {
        return None;
    }
    Some(stripped[opening.len()..stripped.len() - closing.len()].to_string())
}

fn detect_wrapper(text: &str, opening: &str) -> Option<String> {
    let stripped = text.trim();
    match stripped.find(opening) {
        Some(pos) if pos > 0 => Some(stripped[..pos].to_string()),
        _ => None,
    }
}

/// Byte spans of interpolations (`${...}`, `#{...}`, `$name`, `{...}`).
fn interpolation_spans(content: &str, markers: &[InterpolationMarker]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    for m in markers {
        let lead = format!("{}{}", m.prefix, m.open);
        if lead.is_empty() {
            continue;
        }
        let mut from = 0usize;
        while let Some(found) = content[from..].find(&lead) {
            let start = from + found;
            let after = start + lead.len();
            let end = if m.open.is_empty() {
                // `$name` style: the span runs over identifier chars.
                let ident_len = content[after..]
                    .bytes()
                    .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                    .count();
                after + ident_len
            } else {
                match find_balanced_close(&content[after..], m.open, m.close) {
                    Some(rel) => after + rel + m.close.len(),
                    None => content.len(),
                }
            };
            spans.push((start, end));
            from = end.max(start + 1);
        }
    }
    spans.sort_unstable();
    spans
}

fn find_balanced_close(text: &str, open: &str, close: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut i = 0usize;
    while i < text.len() {
        if text[i..].starts_with(open) {
            depth += 1;
            i += open.len();
        } else if text[i..].starts_with(close) {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
            i += close.len();
        } else {
            i += 1;
        }
    }
    None
}

/// Token-budget truncation that never cuts inside an interpolation span.
fn safe_truncate(
    tokenizer: &TokenService,
    content: &str,
    budget: usize,
    markers: &[InterpolationMarker],
) -> String {
    let truncated = tokenizer.truncate_to_tokens(content, budget);
    let mut cut = truncated.len();
    for (start, end) in interpolation_spans(content, markers) {
        if cut > start && cut < end {
            cut = start;
            break;
        }
    }
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    content[..cut].to_string()
}

/// Two-pass literal optimization over one document.
///
/// Pass 1 trims oversized strings in place. Pass 2 rebuilds top-level
/// collections via DFS selection, re-threading pass-1 edits through a
/// composing replacement.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    doc: &SourceDocument,
    editor: &mut EditBuffer,
    metrics: &mut Metrics,
    skip_spans: &[(usize, usize)],
    handler: &LiteralHandler,
    max_tokens: usize,
    is_docstring: Option<NodePredicate>,
) -> Result<()> {
    let literals = doc.query("literals")?;

    // Intersection, not containment: a literal that merely touches a
    // removed element or a stripped body is left alone, so its edit can
    // never collide with the placeholder replacing that region.
    let in_skip = |range: (usize, usize)| {
        skip_spans
            .iter()
            .any(|(s, e)| *s < range.1 && range.0 < *e)
    };

    let collections: Vec<(usize, usize, usize)> = literals
        .iter()
        .enumerate()
        .filter(|(_, (_, cap))| cap.as_str() != "string")
        .map(|(i, (node, _))| (i, node.start_byte(), node.end_byte()))
        .collect();

    // ---- Pass 1: strings ----
    let mut processed_strings: Vec<(usize, usize)> = Vec::new();
    for (node, capture) in &literals {
        if capture.as_str() != "string" {
            continue;
        }
        if let Some(check) = is_docstring {
            if check(*node, doc) {
                continue;
            }
        }
        let range = doc.node_range(*node);
        if in_skip(range) {
            continue;
        }

        let text = doc.node_text(*node);
        if handler.tokenizer.count(text) <= max_tokens {
            continue;
        }

        let base_indent = doc.line_indent_at(range.0);
        let element_indent = detect_element_indent(text, base_indent);
        let Some(parsed) =
            handler.parse_literal(text, node.kind(), range, base_indent, &element_indent)
        else {
            continue;
        };
        let Some(result) = handler.process(&parsed, max_tokens) else {
            continue;
        };
        if result.saved_tokens == 0 {
            continue;
        }

        editor.add_replacement(range.0, range.1, &result.trimmed_text, "literal_trimmed");
        insert_trailing_comment(doc, editor, handler, range.1, &result);
        metrics.bump("literal_trimmed");
        metrics.add(
            "chars_saved",
            (text.len() as i64 - result.trimmed_text.len() as i64).max(0),
        );
        processed_strings.push(range);
    }

    // ---- Pass 2: top-level collections ----
    for (idx, start, end) in &collections {
        let is_nested = collections
            .iter()
            .any(|(j, s, e)| j != idx && *s <= *start && *end <= *e && (*s, *e) != (*start, *end));
        if is_nested {
            continue;
        }
        if processed_strings
            .iter()
            .any(|(s, e)| *s <= *start && *end <= *e)
        {
            continue;
        }
        if in_skip((*start, *end)) {
            continue;
        }

        let (node, _) = &literals[*idx];
        let text = doc.node_text(*node);
        if handler.tokenizer.count(text) <= max_tokens {
            continue;
        }

        let base_indent = doc.line_indent_at(*start);
        let element_indent = detect_element_indent(text, base_indent);
        let Some(parsed) =
            handler.parse_literal(text, node.kind(), (*start, *end), base_indent, &element_indent)
        else {
            continue;
        };
        let Some(result) = handler.process(&parsed, max_tokens) else {
            continue;
        };
        if result.saved_tokens == 0 {
            continue;
        }

        editor.add_replacement_composing_nested(*start, *end, &result.trimmed_text, "literal_trimmed");
        insert_trailing_comment(doc, editor, handler, *end, &result);
        metrics.bump("literal_trimmed");
        metrics.add(
            "chars_saved",
            (text.len() as i64 - result.trimmed_text.len() as i64).max(0),
        );
    }

    Ok(())
}

fn insert_trailing_comment(
    doc: &SourceDocument,
    editor: &mut EditBuffer,
    handler: &LiteralHandler,
    end: usize,
    result: &TrimResult,
) {
    let Some(content) = &result.comment_text else {
        return;
    };
    let text_after = &doc.text()[end..];
    let (comment, offset) = handler.comment_for_context(text_after, content);
    let pos = end + offset;
    if !editor.overlaps(pos, pos) {
        editor.add_insertion(pos, &comment, "literal_comment");
    }
}

/// Indentation used by elements inside a multiline literal: the first
/// non-closing content line, else base + one level.
fn detect_element_indent(literal_text: &str, base_indent: &str) -> String {
    let lines: Vec<&str> = literal_text.split('\n').collect();
    if lines.len() < 2 {
        return format!("{base_indent}    ");
    }
    for line in &lines[1..] {
        let stripped = line.trim();
        if !stripped.is_empty() && !stripped.starts_with([']', '}', ')']) {
            let indent: String = line
                .chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .collect();
            if !indent.is_empty() {
                return indent;
            }
        }
    }
    format!("{base_indent}    ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_spans_cover_braced_and_bare_forms() {
        const MARKERS: &[InterpolationMarker] = &[
            InterpolationMarker {
                prefix: "$",
                open: "{",
                close: "}",
            },
            InterpolationMarker {
                prefix: "$",
                open: "",
                close: "",
            },
        ];
        let spans = interpolation_spans("a ${x + 1} b $name c", MARKERS);
        assert!(spans.contains(&(2, 10)));
        assert!(spans.contains(&(13, 18)));
    }

    #[test]
    fn safe_truncate_backs_off_to_span_start() {
        const MARKERS: &[InterpolationMarker] = &[InterpolationMarker {
            prefix: "$",
            open: "{",
            close: "}",
        }];
        let tok = TokenService::heuristic("t", 4, 32_000);
        let content = "aaaa${verylonginterpolation}bbbb";
        // Budget lands the cut inside the interpolation; it must retreat.
        let cut = safe_truncate(&tok, content, 3, MARKERS);
        assert_eq!(cut, "aaaa");
    }

    #[test]
    fn extract_content_handles_wrapper_prefix() {
        assert_eq!(
            extract_content("vec![1, 2, 3]", "[", "]").as_deref(),
            Some("1, 2, 3")
        );
        assert_eq!(extract_content("[1]", "[", "]").as_deref(), Some("1"));
        assert_eq!(extract_content("nope", "[", "]"), None);
    }
}
