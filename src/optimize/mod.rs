use std::collections::BTreeMap;

pub mod comments;
pub mod function_bodies;
pub mod imports;
pub mod literals;
pub mod public_api;

/// Numeric/string counters reported per file (`removed.functions`,
/// `literal_trimmed`, `md.shifted`, ...).
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    values: BTreeMap<String, i64>,
}

impl Metrics {
    pub fn bump(&mut self, key: &str) {
        self.add(key, 1);
    }

    pub fn add(&mut self, key: &str, delta: i64) {
        *self.values.entry(key.to_string()).or_insert(0) += delta;
    }

    pub fn set(&mut self, key: &str, value: i64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> i64 {
        self.values.get(key).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(*v)))
                .collect(),
        )
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut out = Self::default();
        if let Some(map) = value.as_object() {
            for (k, v) in map {
                if let Some(n) = v.as_i64() {
                    out.values.insert(k.clone(), n);
                }
            }
        }
        out
    }
}

/// A range-tagged removal, rendered later as a short comment stub
/// (`# … function body omitted (3 lines)`). Adjacent placeholders of the
/// same kind merge into one grouped stub.
#[derive(Debug, Clone)]
pub struct Placeholder {
    /// Grouping key ("function", "method", "function_body", "import").
    pub kind: String,
    /// Noun used in the stub; pluralized with a plain `s` when grouped.
    pub noun: String,
    pub start: usize,
    pub end: usize,
    pub start_line: usize,
    pub end_line: usize,
    /// How many omitted things this placeholder stands for.
    pub count: usize,
    /// Original line count covered (summed when grouping).
    pub lines: usize,
}

/// Merge same-kind placeholders whose line gap is at most `max_gap`,
/// keeping the incoming order. Counts and line totals accumulate; the byte
/// range widens to cover the whole group.
pub fn group_placeholders(mut placeholders: Vec<Placeholder>, max_gap: usize) -> Vec<Placeholder> {
    placeholders.sort_by_key(|p| (p.start, p.end));
    let mut out: Vec<Placeholder> = Vec::new();

    for p in placeholders {
        match out.last_mut() {
            Some(prev)
                if prev.kind == p.kind
                    && p.start_line >= prev.end_line
                    && p.start_line - prev.end_line <= max_gap =>
            {
                prev.end = prev.end.max(p.end);
                prev.end_line = prev.end_line.max(p.end_line);
                prev.count += p.count;
                prev.lines += p.lines;
            }
            _ => out.push(p),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ph(kind: &str, start: usize, end: usize, start_line: usize, end_line: usize) -> Placeholder {
        Placeholder {
            kind: kind.to_string(),
            noun: kind.to_string(),
            start,
            end,
            start_line,
            end_line,
            count: 1,
            lines: end_line - start_line + 1,
        }
    }

    #[test]
    fn adjacent_same_kind_placeholders_merge() {
        let merged = group_placeholders(
            vec![ph("function", 0, 20, 0, 2), ph("function", 22, 40, 3, 5)],
            2,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].count, 2);
        assert_eq!(merged[0].lines, 6);
        assert_eq!(merged[0].end, 40);
    }

    #[test]
    fn different_kinds_stay_separate() {
        let merged = group_placeholders(
            vec![ph("function", 0, 20, 0, 2), ph("class", 22, 40, 3, 5)],
            2,
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn distant_placeholders_stay_separate() {
        let merged = group_placeholders(
            vec![ph("function", 0, 20, 0, 2), ph("function", 100, 120, 10, 12)],
            2,
        );
        assert_eq!(merged.len(), 2);
    }
}
