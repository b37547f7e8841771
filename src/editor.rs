/// Byte-range edit collector for one file.
///
/// Non-composing edits must never overlap; overlap means two optimizers
/// fought over the same range, which is a bug, not an input problem, so it
/// panics with the offending tags. A composing edit may enclose earlier
/// narrow edits: their effects are rebased into the wide replacement text.
pub struct EditBuffer {
    original: String,
    edits: Vec<Edit>,
}

#[derive(Debug, Clone)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
    tag: String,
}

impl EditBuffer {
    pub fn new(original: &str) -> Self {
        Self {
            original: original.to_string(),
            edits: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// True when `[start, end)` intersects an already-registered edit.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.edits.iter().any(|e| ranges_overlap(start, end, e))
    }

    /// Edits overlapping `[start, end)` without being fully contained in
    /// it. A composing replacement cannot absorb these; the caller must
    /// either dodge them or retire them first.
    pub fn crossing_edits(&self, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut out: Vec<(usize, usize)> = self
            .edits
            .iter()
            .filter(|e| ranges_overlap(start, end, e) && !(e.start >= start && e.end <= end))
            .map(|e| (e.start, e.end))
            .collect();
        out.sort_unstable();
        out
    }

    /// Withdraw the edit with exactly this range; a wider rewrite has
    /// superseded it.
    pub fn retire_edit(&mut self, start: usize, end: usize) {
        if let Some(pos) = self
            .edits
            .iter()
            .position(|e| e.start == start && e.end == end)
        {
            self.edits.remove(pos);
        }
    }

    pub fn add_replacement(&mut self, start: usize, end: usize, text: &str, tag: &str) {
        assert!(
            start <= end && end <= self.original.len(),
            "edit `{tag}` out of bounds: {start}..{end} (len {})",
            self.original.len()
        );
        if let Some(other) = self.edits.iter().find(|e| ranges_overlap(start, end, e)) {
            panic!(
                "overlapping edits: `{tag}` {start}..{end} vs `{}` {}..{}",
                other.tag, other.start, other.end
            );
        }
        self.edits.push(Edit {
            start,
            end,
            text: text.to_string(),
            tag: tag.to_string(),
        });
    }

    pub fn add_insertion(&mut self, pos: usize, text: &str, tag: &str) {
        self.add_replacement(pos, pos, text, tag);
    }

    /// Wide replacement that may enclose earlier narrow edits.
    ///
    /// `text` was produced from the *original* content of `[start, end)`;
    /// each enclosed edit's original substring is substituted with its
    /// replacement inside `text`, left to right, and the enclosed edits are
    /// retired. Partial overlap is still fatal.
    pub fn add_replacement_composing_nested(
        &mut self,
        start: usize,
        end: usize,
        text: &str,
        tag: &str,
    ) {
        assert!(
            start <= end && end <= self.original.len(),
            "edit `{tag}` out of bounds: {start}..{end}"
        );

        let mut nested: Vec<Edit> = Vec::new();
        let mut remaining: Vec<Edit> = Vec::new();
        for e in self.edits.drain(..) {
            if e.start >= start && e.end <= end {
                nested.push(e);
            } else if ranges_overlap(start, end, &e) {
                panic!(
                    "edit `{tag}` {start}..{end} partially overlaps `{}` {}..{}",
                    e.tag, e.start, e.end
                );
            } else {
                remaining.push(e);
            }
        }
        self.edits = remaining;

        nested.sort_by_key(|e| e.start);
        let mut composed = text.to_string();
        let mut search_from = 0usize;
        for e in &nested {
            if e.start == e.end {
                continue; // plain insertions have no original text to anchor on
            }
            let original_sub = &self.original[e.start..e.end];
            if let Some(found) = composed[search_from..].find(original_sub) {
                let at = search_from + found;
                composed.replace_range(at..at + original_sub.len(), &e.text);
                search_from = at + e.text.len();
            }
            // Not found: the wide rewrite dropped that element; its narrow
            // edit is irrelevant now.
        }

        self.edits.push(Edit {
            start,
            end,
            text: composed,
            tag: tag.to_string(),
        });
    }

    /// Apply all edits in one left-to-right pass.
    pub fn apply(&self) -> String {
        let mut edits: Vec<&Edit> = self.edits.iter().collect();
        edits.sort_by_key(|e| (e.start, e.end));

        let mut out = String::with_capacity(self.original.len());
        let mut cursor = 0usize;
        for e in edits {
            out.push_str(&self.original[cursor..e.start]);
            out.push_str(&e.text);
            cursor = e.end;
        }
        out.push_str(&self.original[cursor..]);
        out
    }

    /// Tags of collected edits, for metrics.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.edits.iter().map(|e| e.tag.as_str())
    }
}

fn ranges_overlap(start: usize, end: usize, e: &Edit) -> bool {
    if start == end {
        // Insertion: collides only when strictly inside a replaced range.
        return start > e.start && start < e.end;
    }
    if e.start == e.end {
        return e.start > start && e.start < end;
    }
    start < e.end && e.start < end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_replaces_and_inserts() {
        let mut buf = EditBuffer::new("hello wide world");
        buf.add_replacement(6, 10, "small", "t1");
        buf.add_insertion(16, "!", "t2");
        assert_eq!(buf.apply(), "hello small world!");
    }

    #[test]
    fn final_length_accounting() {
        let original = "aaa bbb ccc";
        let mut buf = EditBuffer::new(original);
        buf.add_replacement(4, 7, "x", "t");
        let out = buf.apply();
        assert_eq!(out.len(), original.len() - 3 + 1);
    }

    #[test]
    #[should_panic(expected = "overlapping edits")]
    fn overlapping_replacements_panic() {
        let mut buf = EditBuffer::new("0123456789");
        buf.add_replacement(2, 6, "x", "a");
        buf.add_replacement(4, 8, "y", "b");
    }

    #[test]
    fn insertion_at_replacement_boundary_is_fine() {
        let mut buf = EditBuffer::new("0123456789");
        buf.add_replacement(2, 6, "x", "a");
        buf.add_insertion(6, "!", "b");
        assert_eq!(buf.apply(), "01x!6789");
    }

    #[test]
    fn composing_edit_preserves_nested_effects() {
        //            0         1         2
        //            0123456789012345678901234
        let source = r#"[ "long-string", other ]"#;
        let mut buf = EditBuffer::new(source);
        // Narrow pass trimmed the string literal.
        buf.add_replacement(2, 15, r#""long…""#, "string");
        // Wide pass rebuilt the collection from original content.
        buf.add_replacement_composing_nested(0, 24, r#"["long-string"]"#, "collection");
        assert_eq!(buf.apply(), r#"["long…"]"#);
    }

    #[test]
    fn composing_edit_drops_vanished_nested() {
        let source = "[aaa, bbb]";
        let mut buf = EditBuffer::new(source);
        buf.add_replacement(6, 9, "B", "inner");
        // Wide rewrite removed `bbb` entirely; the nested edit is moot.
        buf.add_replacement_composing_nested(0, 10, "[aaa]", "outer");
        assert_eq!(buf.apply(), "[aaa]");
    }

    #[test]
    #[should_panic(expected = "partially overlaps")]
    fn partial_overlap_with_composing_panics() {
        let mut buf = EditBuffer::new("0123456789");
        buf.add_replacement(4, 8, "x", "a");
        buf.add_replacement_composing_nested(0, 6, "y", "b");
    }

    #[test]
    fn crossing_edits_and_retirement() {
        let mut buf = EditBuffer::new("0123456789");
        buf.add_replacement(0, 3, "", "left");
        buf.add_replacement(6, 9, "", "right");

        assert_eq!(buf.crossing_edits(2, 7), vec![(0, 3), (6, 9)]);
        // Fully contained is not crossing.
        assert!(buf.crossing_edits(0, 3).is_empty());
        assert!(buf.crossing_edits(0, 10).is_empty());

        buf.retire_edit(6, 9);
        assert_eq!(buf.apply(), "3456789");
    }
}
