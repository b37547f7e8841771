use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator, Tree};

use crate::errors::{PipelineError, Result};

/// Read-only parsed view of one source file.
///
/// Wraps the tree-sitter tree with byte/char/line utilities and the
/// language's named S-expression queries (`literals`, `comments`,
/// `imports`, ...).
pub struct SourceDocument {
    text: String,
    tree: Tree,
    language: Language,
    queries: &'static [(&'static str, &'static str)],
    line_starts: Vec<usize>,
}

impl SourceDocument {
    pub fn parse(
        text: String,
        language: Language,
        queries: &'static [(&'static str, &'static str)],
    ) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|e| PipelineError::Config(format!("tree-sitter language init: {e}")))?;
        let tree = parser
            .parse(text.as_str(), None)
            .ok_or_else(|| PipelineError::Config("tree-sitter returned no tree".to_string()))?;

        let mut line_starts = vec![0usize];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }

        Ok(Self {
            text,
            tree,
            language,
            queries,
            line_starts,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn node_text(&self, node: Node) -> &str {
        &self.text[node.start_byte()..node.end_byte()]
    }

    pub fn node_range(&self, node: Node) -> (usize, usize) {
        (node.start_byte(), node.end_byte())
    }

    /// Char index of a byte offset. Offsets inside a multi-byte char snap to
    /// the char's start, so `byte_to_char` and `char_to_byte` round-trip on
    /// boundaries.
    pub fn byte_to_char(&self, byte: usize) -> usize {
        let byte = byte.min(self.text.len());
        self.text[..byte_floor(&self.text, byte)].chars().count()
    }

    pub fn char_to_byte(&self, ch: usize) -> usize {
        self.text
            .char_indices()
            .nth(ch)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len())
    }

    /// 0-indexed line containing a byte offset.
    pub fn line_number(&self, byte: usize) -> usize {
        match self.line_starts.binary_search(&byte.min(self.text.len())) {
            Ok(line) => line,
            Err(insert) => insert - 1,
        }
    }

    /// Byte offset where `line` begins.
    pub fn line_start(&self, line: usize) -> usize {
        self.line_starts
            .get(line)
            .copied()
            .unwrap_or(self.text.len())
    }

    /// `(start_line, end_line)` of a node, 0-indexed, end inclusive.
    pub fn line_range(&self, node: Node) -> (usize, usize) {
        let start = self.line_number(node.start_byte());
        let end = self.line_number(node.end_byte().saturating_sub(1).max(node.start_byte()));
        (start, end)
    }

    /// Leading whitespace of the line containing `byte`.
    pub fn line_indent_at(&self, byte: usize) -> &str {
        let line = self.line_number(byte);
        let start = self.line_starts[line];
        let bytes = self.text.as_bytes();
        let mut end = start;
        while end < bytes.len() && (bytes[end] == b' ' || bytes[end] == b'\t') {
            end += 1;
        }
        &self.text[start..end]
    }

    /// Run a named query; yields `(node, capture_name)` in tree order.
    pub fn query(&self, name: &str) -> Result<Vec<(Node<'_>, String)>> {
        let Some((_, source)) = self.queries.iter().find(|(n, _)| *n == name) else {
            return Ok(Vec::new());
        };
        self.run_query(source)
    }

    pub fn run_query(&self, query_src: &str) -> Result<Vec<(Node<'_>, String)>> {
        let query = Query::new(&self.language, query_src)
            .map_err(|e| PipelineError::Config(format!("tree-sitter query: {e}")))?;
        let mut cursor = QueryCursor::new();
        let mut out = Vec::new();

        let mut matches = cursor.matches(&query, self.root(), self.text.as_bytes());
        while let Some(m) = matches.next() {
            for cap in m.captures {
                let cap_name = query.capture_names()[cap.index as usize];
                out.push((cap.node, cap_name.to_string()));
            }
        }

        out.sort_by_key(|(node, _)| (node.start_byte(), node.end_byte()));
        Ok(out)
    }
}

fn byte_floor(text: &str, mut byte: usize) -> usize {
    while byte > 0 && !text.is_char_boundary(byte) {
        byte -= 1;
    }
    byte
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::langs;

    fn doc(text: &str) -> SourceDocument {
        SourceDocument::parse(
            text.to_string(),
            tree_sitter_python::language(),
            langs::python::QUERIES,
        )
        .unwrap()
    }

    #[test]
    fn byte_char_round_trip_on_boundaries() {
        let d = doc("x = \"привет\"\ny = 1\n");
        for (byte, _) in d.text().char_indices() {
            let ch = d.byte_to_char(byte);
            assert_eq!(d.char_to_byte(ch), byte);
        }
    }

    #[test]
    fn line_numbers_and_indent() {
        let d = doc("a = 1\n    b = 2\n");
        assert_eq!(d.line_number(0), 0);
        assert_eq!(d.line_number(6), 1);
        assert_eq!(d.line_indent_at(10), "    ");
    }

    #[test]
    fn named_query_finds_literals() {
        let d = doc("X = [1, 2, 3]\nS = \"hello\"\n");
        let hits = d.query("literals").unwrap();
        let captures: Vec<&str> = hits.iter().map(|(_, c)| c.as_str()).collect();
        assert!(captures.contains(&"sequence"));
        assert!(captures.contains(&"string"));
    }
}
