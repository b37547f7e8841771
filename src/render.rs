use std::collections::{BTreeMap, HashMap};

use crate::config::PathLabelMode;
use crate::manifest::FileRef;
use crate::optimize::Metrics;

/// Per-file processing result; cache-keyed and reused across runs.
#[derive(Debug, Clone)]
pub struct ProcessedBlob {
    pub rel_path: String,
    pub size_bytes: u64,
    pub raw_text: String,
    pub processed_text: String,
    pub meta: Metrics,
    pub cache_key_processed: String,
    pub cache_key_raw: String,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub lang: String,
    pub entries: Vec<FileRef>,
    pub mixed: bool,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub md_only: bool,
    pub use_fence: bool,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone)]
pub struct RenderBlock {
    pub lang: String,
    pub text: String,
    pub file_paths: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderedDocument {
    pub text: String,
    pub blocks: Vec<RenderBlock>,
}

/// Manifest → Plan. Fenced output groups consecutive same-language files;
/// unfenced output is one block, flagged mixed when several languages meet.
pub fn build_plan(files: &[FileRef], code_fence: bool) -> Plan {
    if files.is_empty() {
        return Plan {
            md_only: true,
            use_fence: false,
            groups: Vec::new(),
        };
    }

    let md_only = files.iter().all(|f| f.language_hint.is_empty());
    let use_fence = code_fence && !md_only;

    let mut groups: Vec<Group> = Vec::new();
    if use_fence {
        for file in files {
            match groups.last_mut() {
                Some(g) if g.lang == file.language_hint => g.entries.push(file.clone()),
                _ => groups.push(Group {
                    lang: file.language_hint.clone(),
                    entries: vec![file.clone()],
                    mixed: false,
                }),
            }
        }
    } else {
        let langs: std::collections::BTreeSet<&str> =
            files.iter().map(|f| f.language_hint.as_str()).collect();
        groups.push(Group {
            lang: String::new(),
            entries: files.to_vec(),
            mixed: langs.len() > 1,
        });
    }

    Plan {
        md_only,
        use_fence,
        groups,
    }
}

/// The one place file separators are formatted (em-dashes, U+2014).
pub fn render_file_marker(label: &str) -> String {
    format!("# —— FILE: {label} ——\n")
}

/// Plan + blobs → final document. Fenced groups wrap their files in a
/// single ```lang block with per-file markers; pure-markdown output is a
/// plain concatenation; mixed unfenced output keeps the markers.
pub fn render_document(
    plan: &Plan,
    blobs: &[ProcessedBlob],
    labels: &HashMap<String, String>,
) -> RenderedDocument {
    let by_rel: BTreeMap<&str, &ProcessedBlob> =
        blobs.iter().map(|b| (b.rel_path.as_str(), b)).collect();
    let label_of = |rel: &str| labels.get(rel).cloned().unwrap_or_else(|| rel.to_string());

    if plan.groups.is_empty() {
        return RenderedDocument::default();
    }

    let mut out = String::new();
    let mut blocks: Vec<RenderBlock> = Vec::new();

    if plan.use_fence {
        for group in &plan.groups {
            let mut text = format!("```{}\n", group.lang);
            let mut file_paths: Vec<String> = Vec::new();
            let present: Vec<&FileRef> = group
                .entries
                .iter()
                .filter(|e| by_rel.contains_key(e.rel_path.as_str()))
                .collect();

            for (idx, entry) in present.iter().enumerate() {
                let blob = by_rel[entry.rel_path.as_str()];
                file_paths.push(entry.rel_path.clone());
                text.push_str(&render_file_marker(&label_of(&entry.rel_path)));
                text.push_str(blob.processed_text.trim_end_matches('\n'));
                if idx + 1 < present.len() {
                    text.push_str("\n\n");
                }
            }
            text.push_str("\n```\n");

            out.push_str(&text);
            out.push('\n');
            blocks.push(RenderBlock {
                lang: group.lang.clone(),
                text,
                file_paths,
            });
        }
    } else {
        let entries: Vec<&FileRef> = plan
            .groups
            .iter()
            .flat_map(|g| g.entries.iter())
            .filter(|e| by_rel.contains_key(e.rel_path.as_str()))
            .collect();
        let with_markers = !plan.md_only;

        let mut text = String::new();
        let mut file_paths: Vec<String> = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            let blob = by_rel[entry.rel_path.as_str()];
            file_paths.push(entry.rel_path.clone());
            if with_markers {
                text.push_str(&render_file_marker(&label_of(&entry.rel_path)));
            }
            text.push_str(blob.processed_text.trim_end_matches('\n'));
            if idx + 1 < entries.len() {
                text.push_str("\n\n");
            }
        }

        out.push_str(&text);
        blocks.push(RenderBlock {
            lang: String::new(),
            text,
            file_paths,
        });
    }

    let mut text = out.trim_end().to_string();
    if !text.is_empty() {
        text.push('\n');
    }
    RenderedDocument { text, blocks }
}

// ------------------------- path labels -------------------------

/// Build `{rel_path → label}` for file markers.
///
/// `auto` strips the directory prefix common to every file, uniformly, so
/// labels stay addressable for diffs. `basename` shortens each path to its
/// minimal unique suffix.
pub fn build_labels(rel_paths: &[String], mode: PathLabelMode) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if rel_paths.is_empty() {
        return out;
    }

    match mode {
        PathLabelMode::Relative | PathLabelMode::Off => {
            for p in rel_paths {
                out.insert(p.clone(), p.clone());
            }
        }
        PathLabelMode::Auto => {
            if rel_paths.len() == 1 {
                out.insert(rel_paths[0].clone(), rel_paths[0].clone());
                return out;
            }
            let split: Vec<Vec<&str>> = rel_paths.iter().map(|p| p.split('/').collect()).collect();
            let prefix_len = common_dir_prefix_len(&split);
            for (p, parts) in rel_paths.iter().zip(&split) {
                let rest = if parts.len() > prefix_len {
                    parts[prefix_len..].join("/")
                } else {
                    p.clone()
                };
                out.insert(p.clone(), rest);
            }
        }
        PathLabelMode::Basename => {
            let split: Vec<Vec<&str>> = rel_paths.iter().map(|p| p.split('/').collect()).collect();
            let labels = minimal_unique_suffixes(&split);
            for (p, label) in rel_paths.iter().zip(labels) {
                out.insert(p.clone(), label);
            }
        }
    }
    out
}

/// Number of leading directory components shared by every path (the file
/// name itself never counts).
fn common_dir_prefix_len(paths: &[Vec<&str>]) -> usize {
    let mut len = 0usize;
    loop {
        let mut token: Option<&str> = None;
        for parts in paths {
            let dirs = &parts[..parts.len().saturating_sub(1)];
            match dirs.get(len) {
                None => return len,
                Some(t) => match token {
                    None => token = Some(t),
                    Some(prev) if prev != *t => return len,
                    Some(_) => {}
                },
            }
        }
        if token.is_none() {
            return len;
        }
        len += 1;
    }
}

/// Grow each path's suffix from the basename until all labels are unique.
fn minimal_unique_suffixes(paths: &[Vec<&str>]) -> Vec<String> {
    let n = paths.len();
    let mut suffix_len = vec![1usize; n];

    loop {
        let mut seen: HashMap<Vec<&str>, usize> = HashMap::new();
        for (i, parts) in paths.iter().enumerate() {
            let key: Vec<&str> = parts[parts.len() - suffix_len[i]..].to_vec();
            *seen.entry(key).or_insert(0) += 1;
        }

        let mut changed = false;
        for (i, parts) in paths.iter().enumerate() {
            let key: Vec<&str> = parts[parts.len() - suffix_len[i]..].to_vec();
            if seen[&key] > 1 && suffix_len[i] < parts.len() {
                suffix_len[i] += 1;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    paths
        .iter()
        .zip(&suffix_len)
        .map(|(parts, len)| parts[parts.len() - len..].join("/"))
        .collect()
}
