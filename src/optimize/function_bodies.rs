use glob::Pattern;

use crate::config::{BodyPolicy, FunctionBodyCfg};
use crate::document::SourceDocument;
use crate::elements::CodeElement;
use crate::optimize::{Metrics, Placeholder};

/// Strip or truncate function-like bodies by policy.
///
/// Single-line bodies always survive. Preservation evaluators run in order
/// (name patterns, then annotations); the first hit wins and the base policy
/// applies otherwise. Docstrings stay in place, the stripped tail becomes a
/// placeholder.
pub fn apply(
    doc: &SourceDocument,
    elements: &[CodeElement],
    cfg: &FunctionBodyCfg,
    placeholders: &mut Vec<Placeholder>,
    removed_spans: &[(usize, usize)],
    metrics: &mut Metrics,
) {
    if cfg.policy == BodyPolicy::Keep {
        return;
    }

    let except: Vec<Pattern> = cfg
        .except_patterns
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();

    for element in elements {
        if !element.has_body {
            continue;
        }
        let Some(body) = element.body_range else {
            continue;
        };
        if removed_spans
            .iter()
            .any(|(s, e)| *s <= element.range.0 && element.range.1 <= *e)
        {
            continue;
        }

        let body_start_line = doc.line_number(body.0);
        let body_end_line = doc.line_number(body.1.saturating_sub(1).max(body.0));
        if body_end_line <= body_start_line {
            continue; // single-line protection
        }

        if let Some(name) = &element.name {
            if except.iter().any(|p| p.matches(name)) {
                continue;
            }
        }
        if !cfg.keep_annotated.is_empty() {
            let annotated = element.decorators.iter().any(|(s, e)| {
                let text = &doc.text()[*s..*e];
                cfg.keep_annotated.iter().any(|k| text.contains(k.as_str()))
            });
            if annotated {
                continue;
            }
        }

        let strip_start = match (cfg.policy, element.docstring_range) {
            (BodyPolicy::Trim, _) => {
                // Keep the first statement line (docstring or code), drop the rest.
                let first_keep_end = element.docstring_range.map(|d| d.1).unwrap_or_else(|| {
                    let first_line = doc.line_number(body.0);
                    line_end(doc, first_line).min(body.1)
                });
                first_keep_end
            }
            (_, Some(doc_range)) => doc_range.1,
            (_, None) => body.0,
        };
        if strip_start >= body.1 {
            continue;
        }

        let start_line = doc.line_number(strip_start);
        let end_line = doc.line_number(body.1.saturating_sub(1).max(strip_start));
        placeholders.push(Placeholder {
            kind: format!("{}_body", element.kind),
            noun: format!("{} body", element.kind),
            start: strip_start,
            end: body.1,
            start_line,
            end_line,
            count: 1,
            lines: end_line - start_line + 1,
        });
        metrics.bump(&format!("stripped.{}_body", element.kind));
    }
}

/// Byte offset of the end of `line` (the `\n` itself, or EOF).
fn line_end(doc: &SourceDocument, line: usize) -> usize {
    let text = doc.text();
    let mut current = 0usize;
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            if current == line {
                return i;
            }
            current += 1;
        }
    }
    text.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements;
    use crate::langs;

    fn run(text: &str, cfg: &FunctionBodyCfg) -> Vec<Placeholder> {
        let doc = SourceDocument::parse(
            text.to_string(),
            tree_sitter_python::language(),
            langs::python::QUERIES,
        )
        .unwrap();
        let els = elements::collect(&doc, &langs::python::CODE_DESCRIPTOR).unwrap();
        let mut placeholders = Vec::new();
        let mut metrics = Metrics::default();
        apply(&doc, &els, cfg, &mut placeholders, &[], &mut metrics);
        placeholders
    }

    fn strip_all() -> FunctionBodyCfg {
        FunctionBodyCfg {
            policy: BodyPolicy::StripAll,
            ..FunctionBodyCfg::default()
        }
    }

    #[test]
    fn multiline_bodies_are_stripped() {
        let ph = run("def f():\n    x = 1\n    return x\n", &strip_all());
        assert_eq!(ph.len(), 1);
        assert_eq!(ph[0].kind, "function_body");
    }

    #[test]
    fn single_line_bodies_survive() {
        let ph = run("def f(): return 1\n", &strip_all());
        assert!(ph.is_empty());
    }

    #[test]
    fn docstring_is_preserved() {
        let text = "def f():\n    \"\"\"doc\"\"\"\n    x = 1\n    return x\n";
        let ph = run(text, &strip_all());
        assert_eq!(ph.len(), 1);
        // The strip starts after the docstring.
        assert!(text[..ph[0].start].contains("\"\"\"doc\"\"\""));
    }

    #[test]
    fn except_patterns_keep_bodies() {
        let cfg = FunctionBodyCfg {
            policy: BodyPolicy::StripAll,
            except_patterns: vec!["main*".to_string()],
            ..FunctionBodyCfg::default()
        };
        let ph = run("def main_loop():\n    x = 1\n    return x\n", &cfg);
        assert!(ph.is_empty());
    }

    #[test]
    fn keep_annotated_wins_over_policy() {
        let cfg = FunctionBodyCfg {
            policy: BodyPolicy::StripAll,
            keep_annotated: vec!["@critical".to_string()],
            ..FunctionBodyCfg::default()
        };
        let ph = run("@critical\ndef f():\n    x = 1\n    return x\n", &cfg);
        assert!(ph.is_empty());
    }
}
