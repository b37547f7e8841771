use crate::elements::CodeElement;
use crate::optimize::{Metrics, Placeholder};

/// Remove every element whose visibility predicate said "private".
///
/// Whole ranges (decorators included) become placeholders; nested private
/// elements inside an already-removed parent are skipped so ranges never
/// overlap.
pub fn apply(
    elements: &[CodeElement],
    placeholders: &mut Vec<Placeholder>,
    removed_spans: &mut Vec<(usize, usize)>,
    metrics: &mut Metrics,
) {
    for element in elements {
        if element.is_public {
            continue;
        }
        if removed_spans
            .iter()
            .any(|(s, e)| *s <= element.range.0 && element.range.1 <= *e)
        {
            continue;
        }

        placeholders.push(Placeholder {
            kind: element.kind.clone(),
            noun: element.kind.clone(),
            start: element.range.0,
            end: element.range.1,
            start_line: element.line_range.0,
            end_line: element.line_range.1,
            count: 1,
            lines: element.line_count(),
        });

        removed_spans.push(element.range);
        metrics.bump(&format!("removed.{}", element.kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements;
    use crate::langs;

    fn run(text: &str) -> (Vec<Placeholder>, Metrics) {
        let doc = crate::document::SourceDocument::parse(
            text.to_string(),
            tree_sitter_python::language(),
            langs::python::QUERIES,
        )
        .unwrap();
        let els = elements::collect(&doc, &langs::python::CODE_DESCRIPTOR).unwrap();
        let mut placeholders = Vec::new();
        let mut removed = Vec::new();
        let mut metrics = Metrics::default();
        apply(&els, &mut placeholders, &mut removed, &mut metrics);
        (placeholders, metrics)
    }

    #[test]
    fn private_elements_are_replaced() {
        let (placeholders, metrics) = run(
            "def public():\n    return 1\n\ndef _private():\n    return 2\n",
        );
        assert_eq!(placeholders.len(), 1);
        assert_eq!(placeholders[0].kind, "function");
        assert_eq!(metrics.get("removed.function"), 1);
    }

    #[test]
    fn members_of_removed_class_are_not_double_removed() {
        let (placeholders, _) = run(
            "class _Hidden:\n    def _inner(self):\n        return 1\n",
        );
        assert_eq!(placeholders.len(), 1);
        assert_eq!(placeholders[0].kind, "class");
    }
}
