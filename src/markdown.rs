use regex::Regex;
use std::sync::OnceLock;

/// Result flags of one normalization run, reported as `md.*` metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MdMeta {
    pub removed_h1: bool,
    pub shifted: bool,
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap())
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(```|~~~)").unwrap())
}

/// Walk lines with fence awareness; the callback sees `(line, in_fence)`.
fn scan_lines<'t>(text: &'t str, mut f: impl FnMut(&'t str, bool)) {
    let mut in_fence = false;
    for line in text.lines() {
        if fence_re().is_match(line) {
            f(line, true);
            in_fence = !in_fence;
            continue;
        }
        f(line, in_fence);
    }
}

/// Convert setext headings (`===` / `---` underlines) to ATX so the shift
/// logic has a single heading form to deal with.
fn setext_to_atx(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut in_fence = false;
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i];
        if fence_re().is_match(line) {
            in_fence = !in_fence;
            out.push(line.to_string());
            i += 1;
            continue;
        }
        if !in_fence && i + 1 < lines.len() {
            let next = lines[i + 1].trim_end();
            let underline_level = if !next.is_empty() && next.chars().all(|c| c == '=') {
                Some(1)
            } else if !next.is_empty() && next.chars().all(|c| c == '-') && next.len() >= 2 {
                Some(2)
            } else {
                None
            };
            let text_line = line.trim();
            if let Some(level) = underline_level {
                if !text_line.is_empty() && !text_line.starts_with('#') {
                    out.push(format!("{} {}", "#".repeat(level), text_line));
                    i += 2;
                    continue;
                }
            }
        }
        out.push(line.to_string());
        i += 1;
    }

    let mut joined = out.join("\n");
    if text.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

/// Normalize heading levels: optionally strip a leading H1, then shift all
/// headings so the minimum level lands on `max_heading_level` (clamped to
/// H6). Lines inside fenced blocks are never touched.
pub fn normalize_headings(
    text: &str,
    max_heading_level: usize,
    strip_h1: bool,
) -> (String, MdMeta) {
    let text = setext_to_atx(text);
    let mut meta = MdMeta::default();

    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();

    if strip_h1 {
        // Only a leading H1 (the file's first heading, at level 1) is
        // redundant with the surrounding structure.
        let mut in_fence = false;
        let mut first_heading: Option<(usize, usize)> = None;
        for (i, line) in lines.iter().enumerate() {
            if fence_re().is_match(line) {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }
            if let Some(caps) = heading_re().captures(line) {
                first_heading = Some((i, caps[1].len()));
                break;
            }
        }
        if let Some((i, 1)) = first_heading {
            lines.remove(i);
            if i < lines.len() && lines[i].trim().is_empty() {
                lines.remove(i);
            }
            meta.removed_h1 = true;
        }
    }

    let body = lines.join("\n");
    let mut levels: Vec<usize> = Vec::new();
    scan_lines(&body, |line, in_fence| {
        if !in_fence {
            if let Some(caps) = heading_re().captures(line) {
                levels.push(caps[1].len());
            }
        }
    });

    let Some(&min_lvl) = levels.iter().min() else {
        let mut out = body;
        if text.ends_with('\n') && !out.ends_with('\n') {
            out.push('\n');
        }
        return (out, meta);
    };

    let shift = max_heading_level as i64 - min_lvl as i64;
    if shift == 0 {
        let mut out = body;
        if text.ends_with('\n') && !out.ends_with('\n') {
            out.push('\n');
        }
        return (out, meta);
    }

    let mut out_lines: Vec<String> = Vec::with_capacity(lines.len());
    let mut in_fence = false;
    for line in body.lines() {
        if fence_re().is_match(line) {
            in_fence = !in_fence;
            out_lines.push(line.to_string());
            continue;
        }
        if !in_fence {
            if let Some(caps) = heading_re().captures(line) {
                let level = (caps[1].len() as i64 + shift).clamp(1, 6) as usize;
                out_lines.push(format!("{} {}", "#".repeat(level), &caps[2]));
                continue;
            }
        }
        out_lines.push(line.to_string());
    }

    meta.shifted = true;
    let mut out = out_lines.join("\n");
    if text.ends_with('\n') && !out.ends_with('\n') {
        out.push('\n');
    }
    (out, meta)
}

/// Deepest heading level that appears before `byte_pos`, outside fences.
/// Zero when nothing precedes the position.
pub fn parent_heading_level(text: &str, byte_pos: usize) -> usize {
    let before = &text[..byte_pos.min(text.len())];
    let mut max_level = 0usize;
    scan_lines(before, |line, in_fence| {
        if !in_fence {
            if let Some(caps) = heading_re().captures(line) {
                max_level = max_level.max(caps[1].len());
            }
        }
    });
    max_level
}

/// Lowercased, punctuation-collapsed heading form used for anchor matching.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_dash = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Extract the subtree rooted at the heading whose slug matches `anchor`:
/// the heading line plus everything until the next heading of the same or
/// shallower level (fence-aware).
pub fn extract_anchor(text: &str, anchor: &str) -> Option<String> {
    let want = slugify(anchor);
    let lines: Vec<&str> = text.lines().collect();

    let mut in_fence = false;
    let mut start: Option<(usize, usize)> = None; // (line index, level)

    for (i, line) in lines.iter().enumerate() {
        if fence_re().is_match(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let Some(caps) = heading_re().captures(line) else {
            continue;
        };
        match start {
            None => {
                if slugify(&caps[2]) == want {
                    start = Some((i, caps[1].len()));
                }
            }
            Some((start_idx, level)) => {
                if caps[1].len() <= level {
                    let mut section = lines[start_idx..i].join("\n");
                    section.push('\n');
                    return Some(section);
                }
            }
        }
    }

    start.map(|(start_idx, _)| {
        let mut section = lines[start_idx..].join("\n");
        section.push('\n');
        section
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_strip_and_shift() {
        let (out, meta) = normalize_headings("# Title\n## Subtitle\n### Subsubtitle", 3, true);
        assert_eq!(out, "### Subtitle\n#### Subsubtitle");
        assert!(meta.removed_h1);
        assert!(meta.shifted);
    }

    #[test]
    fn grouped_file_only_shifts() {
        let (out, meta) = normalize_headings("# Title\n## Subtitle\n### Subsubtitle", 3, false);
        assert_eq!(out, "### Title\n#### Subtitle\n##### Subsubtitle");
        assert!(!meta.removed_h1);
        assert!(meta.shifted);
    }

    #[test]
    fn fenced_blocks_are_never_touched() {
        let text = "# T\n```\n# not a heading\n```\n## S\n";
        let (out, _) = normalize_headings(text, 2, false);
        assert!(out.contains("\n# not a heading\n"));
        assert!(out.contains("## T"));
        assert!(out.contains("### S"));
    }

    #[test]
    fn clamps_at_h6() {
        let (out, _) = normalize_headings("## A\n### B\n", 6, false);
        assert!(out.contains("###### A"));
        // H7 would be needed for B; it clamps to 6.
        assert!(out.contains("###### B"));
    }

    #[test]
    fn setext_headings_convert_first() {
        let (out, _) = normalize_headings("Title\n=====\nBody\nSub\n---\n", 1, false);
        assert!(out.starts_with("# Title"));
        assert!(out.contains("## Sub"));
    }

    #[test]
    fn slugs_are_punctuation_flexible() {
        assert_eq!(slugify("API & Usage, Part 2"), "api-usage-part-2");
        assert_eq!(slugify("  Hello  "), "hello");
    }

    #[test]
    fn anchor_extracts_subtree() {
        let text = "# Top\n## First\nbody1\n### Deep\nbody2\n## Second\nbody3\n";
        let got = extract_anchor(text, "first").unwrap();
        assert!(got.contains("## First"));
        assert!(got.contains("### Deep"));
        assert!(!got.contains("Second"));
    }

    #[test]
    fn parent_level_ignores_fences() {
        let text = "# A\n```\n### fake\n```\n## B\nhere";
        let pos = text.find("here").unwrap();
        assert_eq!(parent_heading_level(text, pos), 2);
    }
}
