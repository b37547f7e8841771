use super::parser::{Element, ElementParser};
use super::selector::DfsSelection;
use super::{LiteralCategory, ParsedLiteral, PlaceholderPosition};

/// Replacement text plus an optional trailing comment to be positioned by
/// the context scan.
#[derive(Debug, Clone)]
pub struct FormattedResult {
    pub text: String,
    pub comment: Option<String>,
}

pub struct ResultFormatter {
    single_comment: &'static str,
    block_comment: (&'static str, &'static str),
}

impl ResultFormatter {
    pub fn new(single_comment: &'static str, block_comment: (&'static str, &'static str)) -> Self {
        Self {
            single_comment,
            block_comment,
        }
    }

    // ---------------- strings ----------------

    /// Inline truncation marker inside the original delimiters.
    pub fn format_string(&self, parsed: &ParsedLiteral, truncated_content: &str) -> String {
        format!("{}{}…{}", parsed.opening, truncated_content, parsed.closing)
    }

    // ---------------- collections ----------------

    pub fn format_collection(
        &self,
        parsed: &ParsedLiteral,
        selection: &DfsSelection,
        parser: &ElementParser,
    ) -> FormattedResult {
        let placeholder = parsed.pattern.placeholder_template;
        let text = if parsed.is_multiline {
            self.format_multiline(parsed, selection, parser, placeholder)
        } else {
            self.format_single_line(parsed, selection, parser, placeholder)
        };

        FormattedResult {
            text,
            comment: self.generate_comment(parsed, selection),
        }
    }

    fn kept_texts(
        &self,
        parsed: &ParsedLiteral,
        selection: &DfsSelection,
        parser: &ElementParser,
        placeholder: &str,
        multiline: bool,
    ) -> Vec<String> {
        let threshold = parsed.pattern.nested_inline_threshold;
        selection
            .kept
            .iter()
            .enumerate()
            .map(|(i, elem)| match selection.nested.get(&i) {
                Some(child) => self.reconstruct_nested(
                    elem,
                    child,
                    parser,
                    placeholder,
                    multiline,
                    &parsed.element_indent,
                    &format!("{}    ", parsed.element_indent),
                    threshold,
                ),
                None => elem.text.clone(),
            })
            .collect()
    }

    fn format_single_line(
        &self,
        parsed: &ParsedLiteral,
        selection: &DfsSelection,
        parser: &ElementParser,
        placeholder: &str,
    ) -> String {
        let pattern = parsed.pattern;
        let mut texts = self.kept_texts(parsed, selection, parser, placeholder, false);

        let content = if texts.is_empty() {
            placeholder.to_string()
        } else {
            match pattern.placeholder_position {
                PlaceholderPosition::End | PlaceholderPosition::Inline => {
                    if selection.has_removals() {
                        texts.push(placeholder.to_string());
                    }
                    texts.join(&format!("{} ", pattern.separator))
                }
                PlaceholderPosition::MiddleComment => {
                    if selection.has_removals() {
                        texts.push(self.block_note(selection));
                    }
                    texts.join(&format!("{} ", pattern.separator))
                }
                PlaceholderPosition::None => texts.join(&format!("{} ", pattern.separator)),
            }
        };

        match &parsed.wrapper {
            Some(w) => format!("{w}{}{content}{}", parsed.opening, parsed.closing),
            None => format!("{}{content}{}", parsed.opening, parsed.closing),
        }
    }

    fn format_multiline(
        &self,
        parsed: &ParsedLiteral,
        selection: &DfsSelection,
        parser: &ElementParser,
        placeholder: &str,
    ) -> String {
        let pattern = parsed.pattern;
        let base_indent = &parsed.base_indent;
        let elem_indent = &parsed.element_indent;
        let sep = pattern.separator;

        let mut lines: Vec<String> = Vec::new();
        match &parsed.wrapper {
            Some(w) => lines.push(format!("{w}{}", parsed.opening)),
            None => lines.push(parsed.opening.clone()),
        }

        let texts = self.kept_texts(parsed, selection, parser, placeholder, true);
        let placeholder_is_last = selection.has_removals()
            && pattern.placeholder_position == PlaceholderPosition::End;
        let allow_trailing = parsed.category != LiteralCategory::FactoryCall;

        let count = texts.len();
        for (i, text) in texts.into_iter().enumerate() {
            let is_last_line = i + 1 == count && !placeholder_is_last;
            let trailing = if allow_trailing || !is_last_line { sep } else { "" };
            lines.push(format!("{elem_indent}{text}{trailing}"));
        }

        if selection.has_removals() {
            match pattern.placeholder_position {
                PlaceholderPosition::End => {
                    let trailing = if parsed.category == LiteralCategory::FactoryCall {
                        ""
                    } else {
                        sep
                    };
                    lines.push(format!("{elem_indent}{placeholder}{trailing}"));
                }
                PlaceholderPosition::MiddleComment => {
                    lines.push(format!(
                        "{elem_indent}{} {}",
                        self.single_comment,
                        self.progress_note(selection)
                    ));
                }
                _ => {}
            }
        }

        lines.push(format!("{base_indent}{}", parsed.closing));
        lines.join("\n")
    }

    /// `… (K more, −T tokens)`. K is this level's removals, T includes
    /// nested levels.
    fn progress_note(&self, selection: &DfsSelection) -> String {
        format!(
            "… ({} more, −{} tokens)",
            selection.removed.len(),
            selection.total_tokens_removed()
        )
    }

    fn block_note(&self, selection: &DfsSelection) -> String {
        format!(
            "{} {} {}",
            self.block_comment.0,
            self.progress_note(selection),
            self.block_comment.1
        )
        .trim_end()
        .to_string()
    }

    /// Keep a short, fully-retained nested structure inline even inside a
    /// multiline parent; `(0, 0)` should never explode onto three lines.
    fn should_use_inline(
        &self,
        nested_sel: &DfsSelection,
        texts: &[String],
        parent_multiline: bool,
        max_inline_length: usize,
    ) -> bool {
        if !parent_multiline {
            return true;
        }
        if nested_sel.has_removals() || !nested_sel.nested.is_empty() {
            return false;
        }
        let total: usize =
            texts.iter().map(String::len).sum::<usize>() + texts.len().saturating_sub(1) * 2;
        total <= max_inline_length
    }

    #[allow(clippy::too_many_arguments)]
    fn reconstruct_nested(
        &self,
        elem: &Element,
        nested_sel: &DfsSelection,
        parser: &ElementParser,
        placeholder: &str,
        is_multiline: bool,
        base_indent: &str,
        elem_indent: &str,
        inline_threshold: usize,
    ) -> String {
        let Some(nested) = &elem.nested else {
            return elem.text.clone();
        };

        let texts: Vec<String> = nested_sel
            .kept
            .iter()
            .enumerate()
            .map(|(i, ne)| match nested_sel.nested.get(&i) {
                Some(child) => self.reconstruct_nested(
                    ne,
                    child,
                    parser,
                    placeholder,
                    is_multiline,
                    elem_indent,
                    &format!("{elem_indent}    "),
                    inline_threshold,
                ),
                None => ne.text.clone(),
            })
            .collect();

        let separator = ",";
        let use_inline = self.should_use_inline(nested_sel, &texts, is_multiline, inline_threshold);

        let nested_formatted = if texts.is_empty() {
            placeholder.to_string()
        } else if is_multiline && !use_inline {
            let mut lines: Vec<String> = texts
                .iter()
                .map(|t| format!("{elem_indent}{t}{separator}"))
                .collect();
            if nested_sel.has_removals() {
                lines.push(format!(
                    "{elem_indent}{} {}",
                    self.single_comment,
                    self.progress_note(nested_sel)
                ));
            }
            format!("\n{}\n{base_indent}", lines.join("\n"))
        } else {
            let mut joined = texts.join(", ");
            if nested_sel.has_removals() {
                joined = format!("{joined}, {}", self.block_note(nested_sel));
            }
            joined
        };

        let wrapper_prefix = nested.wrapper.as_deref().unwrap_or("");

        match &elem.key {
            Some(key) => {
                let kv_sep = parser.config.kv_separator.unwrap_or(":");
                let space = if kv_sep.ends_with(' ') { "" } else { " " };
                format!(
                    "{key}{kv_sep}{space}{wrapper_prefix}{}{nested_formatted}{}",
                    nested.opening, nested.closing
                )
            }
            None => format!(
                "{wrapper_prefix}{}{nested_formatted}{}",
                nested.opening, nested.closing
            ),
        }
    }

    // ---------------- trailing comments ----------------

    /// Comment body for positions that carry a separate trailing comment.
    fn generate_comment(&self, parsed: &ParsedLiteral, selection: &DfsSelection) -> Option<String> {
        if !selection.has_removals() {
            return None;
        }
        match parsed.pattern.placeholder_position {
            PlaceholderPosition::None | PlaceholderPosition::MiddleComment => None,
            _ => {
                let name = parsed
                    .pattern
                    .comment_name
                    .unwrap_or(parsed.category.label());
                Some(format!(
                    "literal {name} (−{} tokens)",
                    selection.total_tokens_removed()
                ))
            }
        }
    }

    pub fn string_comment(&self, parsed: &ParsedLiteral, saved_tokens: usize) -> String {
        let name = parsed
            .pattern
            .comment_name
            .unwrap_or(parsed.category.label());
        format!("literal {name} (−{saved_tokens} tokens)")
    }

    /// Decide the comment's insertion offset and syntax from the rest of the
    /// line after the literal: skip closers, sit after `;` or a terminal
    /// `,`, switch to a block comment when code follows.
    pub fn comment_for_context(&self, text_after: &str, content: &str) -> (String, usize) {
        let line_remainder = text_after.split('\n').next().unwrap_or("");
        let (offset, needs_block) = self.find_insertion_point(line_remainder);

        let comment = if needs_block {
            format!(" {} {content} {}", self.block_comment.0, self.block_comment.1)
        } else {
            format!(" {} {content}", self.single_comment)
        };
        (comment, offset)
    }

    fn find_insertion_point(&self, line_remainder: &str) -> (usize, bool) {
        if line_remainder.trim().is_empty() {
            return (0, false);
        }

        let bytes = line_remainder.as_bytes();
        let mut offset = 0usize;

        while offset < bytes.len() && matches!(bytes[offset], b')' | b']' | b'}') {
            offset += 1;
        }

        if offset < bytes.len() && bytes[offset] == b';' {
            offset += 1;
            let after = line_remainder[offset..].trim();
            return (offset, !after.is_empty());
        }

        if offset < bytes.len() && bytes[offset] == b',' {
            offset += 1;
            let after = line_remainder[offset..].trim();
            if after.is_empty() || matches!(after.as_bytes()[0], b')' | b']' | b'}') {
                return (offset, false);
            }
            return (offset, true);
        }

        let remaining = line_remainder[offset..].trim();
        (offset, !remaining.is_empty())
    }

}
