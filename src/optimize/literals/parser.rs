/// Splits literal content into elements: separator-aware at bracket depth 0,
/// string- and escape-aware, with key-value and nested-structure detection.

#[derive(Debug, Clone)]
pub struct ParseConfig {
    pub separator: &'static str,
    pub kv_separator: Option<&'static str>,
    pub string_delimiters: Vec<&'static str>,
    /// Factory wrappers whose `(...)` counts as nested structure
    /// (`Map.ofEntries`, `vec!` would be bracket-based instead).
    pub factory_wrappers: Vec<&'static str>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            separator: ",",
            kv_separator: None,
            string_delimiters: vec!["\"\"\"", "'''", "r#\"", "\"", "'", "`"],
            factory_wrappers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NestedInfo {
    pub opening: String,
    pub closing: String,
    pub content: String,
    pub wrapper: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Element {
    /// Trimmed element text.
    pub text: String,
    pub raw_text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub key: Option<String>,
    pub value: Option<String>,
    pub nested: Option<NestedInfo>,
    pub is_multiline: bool,
}

impl Element {
    pub fn has_nested_structure(&self) -> bool {
        self.nested.is_some()
    }
}

pub struct ElementParser {
    pub config: ParseConfig,
}

impl ElementParser {
    pub fn new(config: ParseConfig) -> Self {
        let mut config = config;
        // Longest delimiters first so `"""` wins over `"`.
        config.string_delimiters.sort_by_key(|d| std::cmp::Reverse(d.len()));
        Self { config }
    }

    pub fn parse(&self, content: &str) -> Vec<Element> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let bytes = content.as_bytes();
        let sep = self.config.separator;
        let mut elements = Vec::new();
        let mut current_start = 0usize;
        let mut depth: i32 = 0;
        let mut in_string: Option<&str> = None;
        let mut i = 0usize;

        while i < bytes.len() {
            if let Some(delim) = in_string {
                if content[i..].starts_with(delim) {
                    // Backslash escape only applies to single-char delimiters.
                    if delim.len() == 1 && i > 0 && bytes[i - 1] == b'\\' {
                        i += 1;
                        continue;
                    }
                    i += delim.len();
                    in_string = None;
                } else {
                    i += char_width(bytes[i]);
                }
                continue;
            }

            if let Some(delim) = self
                .config
                .string_delimiters
                .iter()
                .find(|d| content[i..].starts_with(**d))
            {
                in_string = Some(delim);
                i += delim.len();
                continue;
            }

            match bytes[i] {
                b'(' | b'[' | b'{' => {
                    depth += 1;
                    i += 1;
                    continue;
                }
                b')' | b']' | b'}' => {
                    depth -= 1;
                    i += 1;
                    continue;
                }
                _ => {}
            }

            if depth == 0 && content[i..].starts_with(sep) {
                self.push_element(&mut elements, content, current_start, i);
                i += sep.len();
                current_start = i;
                continue;
            }

            i += char_width(bytes[i]);
        }

        self.push_element(&mut elements, content, current_start, content.len());
        elements
    }

    fn push_element(&self, out: &mut Vec<Element>, content: &str, start: usize, end: usize) {
        let raw = &content[start..end];
        let text = raw.trim();
        if text.is_empty() {
            return;
        }
        out.push(self.create_element(text, raw, start, end));
    }

    fn create_element(&self, text: &str, raw: &str, start: usize, end: usize) -> Element {
        let (key, value) = match self.config.kv_separator {
            Some(sep) => self.split_kv(text, sep),
            None => (None, None),
        };

        let check_text = value.as_deref().unwrap_or(text);
        let nested = self.extract_nested_info(check_text);

        Element {
            text: text.to_string(),
            raw_text: raw.to_string(),
            start_offset: start,
            end_offset: end,
            key,
            value,
            nested,
            is_multiline: text.contains('\n'),
        }
    }

    /// Nested structure: factory wrapper call, whole-element `{...}`/`[...]`,
    /// or the first balanced inner pair. Parentheses alone stay opaque,
    /// they are usually function calls, not data.
    fn extract_nested_info(&self, text: &str) -> Option<NestedInfo> {
        let text = text.trim();

        for wrapper in &self.config.factory_wrappers {
            let prefix = format!("{wrapper}(");
            if text.starts_with(&prefix) && text.ends_with(')') {
                return Some(NestedInfo {
                    opening: "(".to_string(),
                    closing: ")".to_string(),
                    content: text[prefix.len()..text.len() - 1].to_string(),
                    wrapper: Some(wrapper.to_string()),
                });
            }
        }

        const PAIRS: [(char, char); 2] = [('{', '}'), ('[', ']')];

        for (open, close) in PAIRS {
            if text.starts_with(open) && text.ends_with(close) && text.len() >= 2 {
                return Some(NestedInfo {
                    opening: open.to_string(),
                    closing: close.to_string(),
                    content: text[open.len_utf8()..text.len() - close.len_utf8()].to_string(),
                    wrapper: None,
                });
            }
        }

        for (open, close) in PAIRS {
            if let Some(open_pos) = text.find(open) {
                let mut depth = 0i32;
                for (i, c) in text[open_pos..].char_indices() {
                    if c == open {
                        depth += 1;
                    } else if c == close {
                        depth -= 1;
                        if depth == 0 {
                            let content = &text[open_pos + open.len_utf8()..open_pos + i];
                            return Some(NestedInfo {
                                opening: open.to_string(),
                                closing: close.to_string(),
                                content: content.to_string(),
                                wrapper: None,
                            });
                        }
                    }
                }
            }
        }

        None
    }

    /// First separator occurrence at depth 0, outside strings.
    fn split_kv(&self, text: &str, separator: &str) -> (Option<String>, Option<String>) {
        let bytes = text.as_bytes();
        let mut depth = 0i32;
        let mut in_string: Option<u8> = None;
        let mut i = 0usize;

        while i < bytes.len() {
            let b = bytes[i];

            if let Some(q) = in_string {
                if b == q && (i == 0 || bytes[i - 1] != b'\\') {
                    in_string = None;
                }
                i += char_width(b);
                continue;
            }
            if matches!(b, b'"' | b'\'' | b'`') {
                in_string = Some(b);
                i += 1;
                continue;
            }
            match b {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                _ => {}
            }
            if depth == 0 && content_at(text, i).starts_with(separator) {
                let key = text[..i].trim().to_string();
                let value = text[i + separator.len()..].trim().to_string();
                return (Some(key), Some(value));
            }
            i += char_width(b);
        }

        (None, None)
    }
}

fn content_at(text: &str, i: usize) -> &str {
    &text[i..]
}

fn char_width(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ElementParser {
        ElementParser::new(ParseConfig::default())
    }

    fn kv_parser() -> ElementParser {
        ElementParser::new(ParseConfig {
            kv_separator: Some(":"),
            ..ParseConfig::default()
        })
    }

    #[test]
    fn splits_on_separator_at_depth_zero() {
        let els = parser().parse("1, [2, 3], f(4, 5)");
        let texts: Vec<&str> = els.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["1", "[2, 3]", "f(4, 5)"]);
    }

    #[test]
    fn separators_inside_strings_are_opaque() {
        let els = parser().parse(r#""a, b", 'c, d', 2"#);
        let texts: Vec<&str> = els.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec![r#""a, b""#, "'c, d'", "2"]);
    }

    #[test]
    fn triple_quotes_and_escapes() {
        let els = parser().parse(r#""""x, y""", "a\", b", 3"#);
        assert_eq!(els.len(), 3);
        assert_eq!(els[2].text, "3");
    }

    #[test]
    fn detects_key_value_pairs() {
        let els = kv_parser().parse(r#""a": 1, "b": {"c": 2}"#);
        assert_eq!(els[0].key.as_deref(), Some(r#""a""#));
        assert_eq!(els[0].value.as_deref(), Some("1"));
        assert_eq!(els[1].key.as_deref(), Some(r#""b""#));
        assert!(els[1].nested.is_some());
    }

    #[test]
    fn nested_structure_at_boundaries() {
        let els = parser().parse("[1, 2], {3: 4}");
        assert_eq!(els[0].nested.as_ref().unwrap().content, "1, 2");
        assert_eq!(els[1].nested.as_ref().unwrap().opening, "{");
    }

    #[test]
    fn nested_structure_inside_element() {
        let els = kv_parser().parse(r#""users": [{"id": 1}, {"id": 2}]"#);
        let nested = els[0].nested.as_ref().unwrap();
        assert_eq!(nested.opening, "[");
        assert_eq!(nested.content, r#"{"id": 1}, {"id": 2}"#);
    }

    #[test]
    fn factory_wrapper_counts_as_nested() {
        let p = ElementParser::new(ParseConfig {
            factory_wrappers: vec!["Map.ofEntries"],
            ..ParseConfig::default()
        });
        let els = p.parse("Map.ofEntries(a, b), 2");
        let nested = els[0].nested.as_ref().unwrap();
        assert_eq!(nested.wrapper.as_deref(), Some("Map.ofEntries"));
        assert_eq!(nested.content, "a, b");
    }

    #[test]
    fn empty_content_parses_to_nothing() {
        assert!(parser().parse("   ").is_empty());
        assert!(parser().parse("").is_empty());
    }
}
