use crate::config::ImportsCfg;
use crate::document::SourceDocument;
use crate::errors::Result;
use crate::optimize::{Metrics, Placeholder};

/// Syntactic local-import detector: gets the full statement text.
pub type ImportClassifier = fn(&str) -> bool;

/// Summarize consecutive runs of local imports into one placeholder.
///
/// External (stdlib/third-party) imports always survive; they are the
/// highest-signal lines for a reader placing the file in its ecosystem.
pub fn apply(
    doc: &SourceDocument,
    cfg: &ImportsCfg,
    is_local: ImportClassifier,
    placeholders: &mut Vec<Placeholder>,
    skip_spans: &[(usize, usize)],
    metrics: &mut Metrics,
) -> Result<()> {
    if !cfg.strip_local {
        return Ok(());
    }

    let mut run: Vec<(usize, usize, usize, usize)> = Vec::new(); // (start, end, start_line, end_line)

    let mut flush = |run: &mut Vec<(usize, usize, usize, usize)>,
                     placeholders: &mut Vec<Placeholder>,
                     metrics: &mut Metrics| {
        if run.is_empty() {
            return;
        }
        let start = run.first().unwrap().0;
        let end = run.last().unwrap().1;
        let start_line = run.first().unwrap().2;
        let end_line = run.last().unwrap().3;
        let lines = run.iter().map(|(_, _, s, e)| e - s + 1).sum();
        placeholders.push(Placeholder {
            kind: "import".to_string(),
            noun: "import".to_string(),
            start,
            end,
            start_line,
            end_line,
            count: run.len(),
            lines,
        });
        metrics.add("removed.imports", run.len() as i64);
        run.clear();
    };

    for (node, capture) in doc.query("imports")? {
        if capture != "import" {
            continue;
        }
        let range = doc.node_range(node);
        if skip_spans
            .iter()
            .any(|(s, e)| *s <= range.0 && range.1 <= *e)
        {
            continue;
        }

        let text = doc.node_text(node);
        let (start_line, end_line) = doc.line_range(node);

        if is_local(text) {
            // Break the run if a non-import line intervenes.
            if let Some(last) = run.last() {
                if start_line > last.3 + 1 {
                    flush(&mut run, placeholders, metrics);
                }
            }
            run.push((range.0, range.1, start_line, end_line));
        } else {
            flush(&mut run, placeholders, metrics);
        }
    }
    flush(&mut run, placeholders, metrics);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::langs;

    fn run(text: &str) -> Vec<Placeholder> {
        let doc = SourceDocument::parse(
            text.to_string(),
            tree_sitter_python::language(),
            langs::python::QUERIES,
        )
        .unwrap();
        let mut placeholders = Vec::new();
        let mut metrics = Metrics::default();
        apply(
            &doc,
            &ImportsCfg { strip_local: true },
            langs::python::is_local_import,
            &mut placeholders,
            &[],
            &mut metrics,
        )
        .unwrap();
        placeholders
    }

    #[test]
    fn consecutive_local_imports_collapse() {
        let ph = run("from .a import x\nfrom .b import y\nimport os\n");
        assert_eq!(ph.len(), 1);
        assert_eq!(ph[0].count, 2);
        assert_eq!(ph[0].lines, 2);
    }

    #[test]
    fn external_imports_split_runs() {
        let ph = run("from .a import x\nimport os\nfrom .b import y\n");
        assert_eq!(ph.len(), 2);
        assert!(ph.iter().all(|p| p.count == 1));
    }

    #[test]
    fn pure_external_imports_are_untouched() {
        let ph = run("import os\nimport sys\n");
        assert!(ph.is_empty());
    }
}
