use crate::config::CommentPolicy;
use crate::document::SourceDocument;
use crate::editor::EditBuffer;
use crate::elements::CodeElement;
use crate::errors::Result;
use crate::optimize::Metrics;

/// Prune or summarize comments and docstrings.
///
/// Doc comments are recognized by the `comment.doc` capture of the
/// language's `comments` query or by a doc prefix (`///`, `/**`). Docstrings
/// come from the element collector plus the module-level docstring.
pub fn apply(
    doc: &SourceDocument,
    elements: &[CodeElement],
    policy: CommentPolicy,
    doc_prefixes: &[&str],
    editor: &mut EditBuffer,
    skip_spans: &[(usize, usize)],
    metrics: &mut Metrics,
) -> Result<()> {
    if policy == CommentPolicy::KeepAll {
        return Ok(());
    }

    let skip = |range: (usize, usize)| {
        skip_spans
            .iter()
            .any(|(s, e)| range.0 < *e && *s < range.1)
    };

    let mut docstrings: Vec<(usize, usize)> = elements
        .iter()
        .filter_map(|e| e.docstring_range)
        .collect();
    if let Some(module_doc) = module_docstring(doc) {
        docstrings.push(module_doc);
    }
    docstrings.sort_unstable();
    docstrings.dedup();

    for (node, capture) in doc.query("comments")? {
        let range = doc.node_range(node);
        if skip(range) {
            continue;
        }
        let text = doc.node_text(node);
        let is_doc =
            capture == "comment.doc" || doc_prefixes.iter().any(|p| text.starts_with(p));

        let remove = match policy {
            CommentPolicy::KeepAll => false,
            CommentPolicy::StripAll => true,
            CommentPolicy::KeepDoc | CommentPolicy::KeepFirstSentence => !is_doc,
        };

        if remove {
            // The expanded whole-line range must respect blocked regions
            // too, or the trailing newline could lap into a placeholder.
            let (start, end) = line_removal_range(doc, range.0, range.1);
            if !skip((start, end)) && !editor.overlaps(start, end) {
                editor.add_replacement(start, end, "", "comment_removed");
                metrics.bump("removed.comments");
            }
        } else if policy == CommentPolicy::KeepFirstSentence && is_doc {
            if let Some(truncated) = first_sentence_of_comment(text) {
                if truncated.len() < text.len() && !editor.overlaps(range.0, range.1) {
                    editor.add_replacement(range.0, range.1, &truncated, "comment_trimmed");
                    metrics.bump("trimmed.comments");
                }
            }
        }
    }

    for (start, end) in docstrings {
        if skip((start, end)) {
            continue;
        }
        match policy {
            CommentPolicy::StripAll => {
                let (s, e) = line_removal_range(doc, start, end);
                if !skip((s, e)) && !editor.overlaps(s, e) {
                    editor.add_replacement(s, e, "", "docstring_removed");
                    metrics.bump("removed.docstrings");
                }
            }
            CommentPolicy::KeepFirstSentence => {
                let text = &doc.text()[start..end];
                if let Some(truncated) = first_sentence_of_docstring(text) {
                    if truncated.len() < text.len() && !editor.overlaps(start, end) {
                        editor.add_replacement(start, end, &truncated, "docstring_trimmed");
                        metrics.bump("trimmed.docstrings");
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// First expression-statement string of the file (Python module docstrings).
fn module_docstring(doc: &SourceDocument) -> Option<(usize, usize)> {
    let root = doc.root();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        match child.kind() {
            "comment" => continue,
            "expression_statement" => {
                let mut inner = child.walk();
                let has_string = child.children(&mut inner).any(|c| c.kind() == "string");
                return has_string.then(|| (child.start_byte(), child.end_byte()));
            }
            _ => return None,
        }
    }
    None
}

/// Expand a comment's range so its removal leaves no husk: whole-line
/// comments take the line (and its newline) with them; trailing comments
/// also eat the spaces before them.
fn line_removal_range(doc: &SourceDocument, start: usize, end: usize) -> (usize, usize) {
    let text = doc.text();
    let line = doc.line_number(start);
    let line_start = doc.line_start(line);

    let only_ws_before = text[line_start..start].chars().all(char::is_whitespace);
    let rest = &text[end..];
    let line_tail = rest.split('\n').next().unwrap_or("");
    let only_ws_after = line_tail.trim().is_empty();

    if only_ws_before && only_ws_after {
        let mut e = end + line_tail.len();
        if text[e..].starts_with('\n') {
            e += 1;
        }
        return (line_start, e);
    }

    // Trailing comment: back over the spacing that separated it from code.
    let mut s = start;
    let bytes = text.as_bytes();
    while s > line_start && matches!(bytes[s - 1], b' ' | b'\t') {
        s -= 1;
    }
    (s, end)
}

/// Truncate a doc comment to its first sentence. Line-comment form keeps the
/// first line; block form rebuilds `/** sentence */`.
fn first_sentence_of_comment(text: &str) -> Option<String> {
    if text.starts_with("/*") {
        let inner = text
            .trim_start_matches('/')
            .trim_start_matches('*')
            .trim_end_matches('/')
            .trim_end_matches('*');
        let sentence = first_sentence(inner)?;
        return Some(format!("/** {} */", sentence.trim()));
    }
    // Line comment: first line is the first sentence approximation.
    Some(text.split('\n').next().unwrap_or(text).to_string())
}

/// Truncate a docstring literal, preserving its delimiters.
fn first_sentence_of_docstring(text: &str) -> Option<String> {
    let delim = ["\"\"\"", "'''", "\"", "'"]
        .into_iter()
        .find(|d| {
            let t = text.trim_start_matches(|c: char| c.is_ascii_alphabetic());
            t.starts_with(d) && text.trim_end().ends_with(d)
        })?;
    let trimmed = text.trim();
    let open_at = trimmed.find(delim)?;
    let prefix = &trimmed[..open_at + delim.len()];
    let inner = &trimmed[open_at + delim.len()..trimmed.len() - delim.len()];
    let sentence = first_sentence(inner)?;
    Some(format!("{prefix}{}{delim}", sentence.trim_end()))
}

fn first_sentence(text: &str) -> Option<String> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    for (i, _) in trimmed.match_indices('.') {
        let after = &trimmed[i + 1..];
        if after.is_empty() || after.starts_with([' ', '\n', '\t']) {
            return Some(trimmed[..=i].to_string());
        }
    }
    Some(trimmed.split('\n').next().unwrap_or(trimmed).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements;
    use crate::langs;

    fn run(text: &str, policy: CommentPolicy) -> String {
        let doc = SourceDocument::parse(
            text.to_string(),
            tree_sitter_python::language(),
            langs::python::QUERIES,
        )
        .unwrap();
        let els = elements::collect(&doc, &langs::python::CODE_DESCRIPTOR).unwrap();
        let mut editor = EditBuffer::new(doc.text());
        let mut metrics = Metrics::default();
        apply(&doc, &els, policy, &[], &mut editor, &[], &mut metrics).unwrap();
        editor.apply()
    }

    #[test]
    fn strip_all_removes_comments_and_docstrings() {
        let out = run(
            "\"\"\"Module doc.\"\"\"\n# note\nx = 1  # trailing\n",
            CommentPolicy::StripAll,
        );
        assert!(!out.contains("note"));
        assert!(!out.contains("Module doc"));
        assert!(!out.contains("trailing"));
        assert!(out.contains("x = 1"));
    }

    #[test]
    fn keep_doc_preserves_docstrings() {
        let out = run(
            "def f():\n    \"\"\"Doc.\"\"\"\n    # impl note\n    return 1\n",
            CommentPolicy::KeepDoc,
        );
        assert!(out.contains("Doc."));
        assert!(!out.contains("impl note"));
    }

    #[test]
    fn first_sentence_truncates_docstring() {
        let out = run(
            "def f():\n    \"\"\"First sentence. Second sentence here.\"\"\"\n    return 1\n",
            CommentPolicy::KeepFirstSentence,
        );
        assert!(out.contains("First sentence."));
        assert!(!out.contains("Second sentence"));
    }

    #[test]
    fn whole_line_comment_removal_leaves_no_blank_line() {
        let out = run("# gone\nx = 1\n", CommentPolicy::StripAll);
        assert_eq!(out, "x = 1\n");
    }
}
