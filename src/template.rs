use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::addressing::{
    AddressingContext, MdParam, ParsedPath, PathParser, PathResolver, ResolvedPath, ResourceKind,
};
use crate::config::{Config, CFG_DIR, CONTEXTS_DIR};
use crate::errors::{PipelineError, Result};
use crate::markdown;
use crate::optimize::Metrics;

/// Hard stop for runaway nesting; cycles are caught earlier by the visited
/// set, this guards degenerate deep chains.
const MAX_DEPTH: usize = 32;

/// A section placeholder hit during expansion. The handler renders the
/// section's block (or just records usage during the scan phase).
#[derive(Debug, Clone)]
pub struct SectionRequest {
    /// `canonical_id`, prefixed `scope_rel::` outside the root scope.
    pub qualified_id: String,
    pub canonical_id: String,
    pub scope_rel: String,
    pub scope_dir: PathBuf,
    pub cfg_root: PathBuf,
}

impl SectionRequest {
    pub fn qualify(scope_rel: &str, canonical_id: &str) -> String {
        if scope_rel.is_empty() {
            canonical_id.to_string()
        } else {
            format!("{scope_rel}::{canonical_id}")
        }
    }
}

pub type SectionHandler<'h> = Box<dyn FnMut(&SectionRequest) -> Result<String> + 'h>;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z0-9_:/@\[\].\-#,]+)\}|\$([A-Za-z0-9_:/@\[\].\-#,]+)").unwrap()
    })
}

/// Recursive `${...}` expander over the federated `lg-cfg/` config domains.
///
/// Resolution state lives in an [`AddressingContext`] stack; cycles are
/// detected by a visited set keyed `(cfg_root, resource_rel)`. Section
/// placeholders are delegated to the handler so the same engine serves both
/// the usage-scan and the final render.
pub struct TemplateEngine<'h> {
    repo_root: PathBuf,
    resolver: PathResolver,
    configs: HashMap<PathBuf, Config>,
    visited: HashSet<(PathBuf, String)>,
    section_handler: SectionHandler<'h>,
    /// Aggregated markdown-inclusion metadata (`md.removed_h1`, ...).
    pub md_meta: Metrics,
}

impl<'h> TemplateEngine<'h> {
    pub fn new(repo_root: &Path, section_handler: SectionHandler<'h>) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            resolver: PathResolver::new(repo_root),
            configs: HashMap::new(),
            visited: HashSet::new(),
            section_handler,
            md_meta: Metrics::default(),
        }
    }

    /// Expand the run's root context (`lg-cfg/contexts/<name>.ctx.md`).
    pub fn expand_context(&mut self, name: &str) -> Result<String> {
        let parsed = ParsedPath {
            kind: ResourceKind::Context,
            origin: None,
            origin_explicit: false,
            path: format!("{CONTEXTS_DIR}/{name}"),
            is_absolute: true,
            anchor: None,
            parameters: BTreeMap::new(),
        };
        let mut ctx = AddressingContext::new(&self.repo_root, &self.repo_root.join(CFG_DIR));
        let resolved = self.resolver.resolve(&parsed, &ctx)?;
        self.expand_resource(&resolved, &mut ctx)
    }

    fn expand_resource(
        &mut self,
        resolved: &ResolvedPath,
        ctx: &mut AddressingContext,
    ) -> Result<String> {
        if !resolved.resource_path.is_file() {
            return Err(PipelineError::Template(format!(
                "resource not found: {}",
                resolved.resource_path.display()
            )));
        }

        let key = (resolved.cfg_root.clone(), resolved.resource_rel.clone());
        if !self.visited.insert(key.clone()) {
            return Err(PipelineError::Template(format!(
                "template cycle through {}",
                resolved.resource_rel
            )));
        }
        if ctx.depth() > MAX_DEPTH {
            return Err(PipelineError::Template(format!(
                "template nesting exceeds {MAX_DEPTH} levels at {}",
                resolved.resource_rel
            )));
        }

        let text = std::fs::read_to_string(&resolved.resource_path)?;
        ctx.push_for_resource(resolved);
        let result = self.process_text(&text, ctx);
        ctx.pop();
        self.visited.remove(&key);
        result
    }

    /// Substitute placeholders left to right. Expanded content is never
    /// re-scanned, so `${...}`-looking text inside included source files
    /// stays untouched.
    fn process_text(&mut self, text: &str, ctx: &mut AddressingContext) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0usize;

        let matches: Vec<(usize, usize, String)> = placeholder_re()
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let name = caps.get(1).or_else(|| caps.get(2))?.as_str().to_string();
                Some((whole.start(), whole.end(), name))
            })
            .collect();

        for (start, end, name) in matches {
            out.push_str(&text[last..start]);
            let expanded = self.expand_placeholder(&name, ctx, &out)?;
            out.push_str(&expanded);
            last = end;
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn expand_placeholder(
        &mut self,
        name: &str,
        ctx: &mut AddressingContext,
        rendered_before: &str,
    ) -> Result<String> {
        if let Some(raw) = split_reference(name, "tpl") {
            let parsed = PathParser::parse(&raw, ResourceKind::Template)?;
            let resolved = self.resolver.resolve(&parsed, ctx)?;
            return self.expand_resource(&resolved, ctx);
        }
        if let Some(raw) = split_reference(name, "ctx") {
            let parsed = PathParser::parse(&raw, ResourceKind::Context)?;
            let resolved = self.resolver.resolve(&parsed, ctx)?;
            return self.expand_resource(&resolved, ctx);
        }
        if let Some(raw) = split_reference(name, "md") {
            return self.expand_markdown(&raw, ctx, rendered_before);
        }
        self.expand_section(name, ctx)
    }

    // ------------------------- markdown -------------------------

    fn expand_markdown(
        &mut self,
        raw: &str,
        ctx: &mut AddressingContext,
        rendered_before: &str,
    ) -> Result<String> {
        let parsed = match raw.strip_prefix('@') {
            Some(rest) => PathParser::parse_markdown(rest, true)?,
            None => PathParser::parse_markdown(raw, false)?,
        };

        let has_glob = parsed.path.contains(['*', '?']);
        if has_glob && parsed.anchor.is_some() {
            return Err(PipelineError::PathParse {
                raw: raw.to_string(),
                message: "glob patterns cannot be combined with #anchors".to_string(),
            });
        }

        let resolved = self.resolver.resolve(&parsed, ctx)?;
        let files = if has_glob {
            expand_glob(&resolved.resource_path)?
        } else {
            vec![resolved.resource_path.clone()]
        };
        if files.is_empty() {
            return Err(PipelineError::Template(format!(
                "markdown include matched no files: {raw}"
            )));
        }

        // Heading placement follows the document rendered so far.
        let parent_level = markdown::parent_heading_level(rendered_before, rendered_before.len());
        let mut max_level = (parent_level + 1).min(6).max(1);
        let mut strip_h1 = parent_level > 0;
        match resolved.parameters.get("level") {
            Some(MdParam::Int(level)) => max_level = (*level).clamp(1, 6) as usize,
            Some(MdParam::Str(s)) => {
                if let Ok(level) = s.parse::<i64>() {
                    max_level = level.clamp(1, 6) as usize;
                }
            }
            _ => {}
        }
        if let Some(MdParam::Bool(v)) = resolved.parameters.get("strip_h1") {
            strip_h1 = *v;
        }

        let group_size = files.len();
        let mut parts: Vec<String> = Vec::with_capacity(group_size);
        for file in &files {
            if !file.is_file() {
                return Err(PipelineError::Template(format!(
                    "markdown file not found: {}",
                    file.display()
                )));
            }
            let mut text = std::fs::read_to_string(file)?;
            if let Some(anchor) = &resolved.anchor {
                text = markdown::extract_anchor(&text, anchor).ok_or_else(|| {
                    PipelineError::Template(format!(
                        "anchor `#{anchor}` not found in {}",
                        file.display()
                    ))
                })?;
            }
            let (normalized, meta) =
                markdown::normalize_headings(&text, max_level, strip_h1 && group_size == 1);
            self.md_meta.add("md.removed_h1", meta.removed_h1 as i64);
            if meta.shifted {
                self.md_meta.set("md.shifted", 1);
            }
            parts.push(normalized.trim_end_matches('\n').to_string());
        }

        Ok(parts.join("\n\n"))
    }

    // ------------------------- sections -------------------------

    fn expand_section(&mut self, name: &str, ctx: &mut AddressingContext) -> Result<String> {
        let parsed = PathParser::parse(name, ResourceKind::Section)?;
        let (scope_dir, scope_rel, cfg_root) = self.resolver.scope_for(&parsed, ctx)?;

        // Scoped fallback applies only within the scope we are already in:
        // an explicit origin starts fresh at that scope's root.
        let current_dir = if parsed.origin_explicit || parsed.is_absolute {
            ""
        } else {
            ctx.current_dir()
        };

        let canonical_id = {
            let config = self.config_for(&cfg_root)?;
            config
                .find_section(&parsed.path, current_dir)
                .map(|s| s.canonical_id.clone())
        };
        let Some(canonical_id) = canonical_id else {
            return Err(PipelineError::Template(format!(
                "unknown section `{name}` (scope `{}`)",
                if scope_rel.is_empty() { "." } else { &scope_rel }
            )));
        };

        let request = SectionRequest {
            qualified_id: SectionRequest::qualify(&scope_rel, &canonical_id),
            canonical_id,
            scope_rel,
            scope_dir,
            cfg_root,
        };
        (self.section_handler)(&request)
    }

    fn config_for(&mut self, cfg_root: &Path) -> Result<&Config> {
        if !self.configs.contains_key(cfg_root) {
            let config = Config::load(cfg_root)?;
            self.configs.insert(cfg_root.to_path_buf(), config);
        }
        Ok(&self.configs[cfg_root])
    }
}

/// Split `tpl[...]` / `tpl:...` / `tpl@...` into the raw reference.
/// Anything else (including a bare `tpl`) is not this kind.
fn split_reference(name: &str, kind: &str) -> Option<String> {
    let rest = name.strip_prefix(kind)?;
    let mut chars = rest.chars();
    match chars.next() {
        Some('[') if rest.ends_with(']') => Some(rest[1..rest.len() - 1].to_string()),
        Some(':') => Some(rest[1..].to_string()),
        Some('@') => Some(rest.to_string()),
        _ => None,
    }
}

fn expand_glob(pattern_path: &Path) -> Result<Vec<PathBuf>> {
    let pattern = pattern_path.to_string_lossy();
    let mut out: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| PipelineError::Template(format!("bad glob `{pattern}`: {e}")))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, text: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, text).unwrap();
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "lg-cfg/sections.yaml",
            "core:\n  extensions: ['.py']\n",
        );
        dir
    }

    fn expand(dir: &Path, name: &str) -> Result<(String, Vec<String>)> {
        let mut seen: Vec<String> = Vec::new();
        let text = {
            let handler: SectionHandler = Box::new(|req| {
                seen.push(req.qualified_id.clone());
                Ok(format!("<{}>", req.qualified_id))
            });
            let mut engine = TemplateEngine::new(dir, handler);
            engine.expand_context(name)?
        };
        Ok((text, seen))
    }

    #[test]
    fn substitutes_sections_and_nested_templates() {
        let dir = fixture();
        write(
            dir.path(),
            "lg-cfg/contexts/main.ctx.md",
            "Intro\n${tpl:/shared/head}\n${core}\n",
        );
        write(dir.path(), "lg-cfg/shared/head.tpl.md", "HEAD");

        let (text, seen) = expand(dir.path(), "main").unwrap();
        assert_eq!(text, "Intro\nHEAD\n<core>\n");
        assert_eq!(seen, vec!["core".to_string()]);
    }

    #[test]
    fn relative_includes_follow_the_including_file() {
        let dir = fixture();
        write(
            dir.path(),
            "lg-cfg/contexts/main.ctx.md",
            "${tpl:parts/one}",
        );
        // Relative to contexts/, not to lg-cfg root.
        write(dir.path(), "lg-cfg/contexts/parts/one.tpl.md", "ONE ${tpl:two}");
        write(dir.path(), "lg-cfg/contexts/parts/two.tpl.md", "TWO");

        let (text, _) = expand(dir.path(), "main").unwrap();
        assert_eq!(text, "ONE TWO");
    }

    #[test]
    fn cycles_are_detected() {
        let dir = fixture();
        write(dir.path(), "lg-cfg/contexts/main.ctx.md", "${tpl:/a}");
        write(dir.path(), "lg-cfg/a.tpl.md", "${tpl:b}");
        write(dir.path(), "lg-cfg/b.tpl.md", "${tpl:a}");

        let err = expand(dir.path(), "main").unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn missing_resource_is_fatal() {
        let dir = fixture();
        write(dir.path(), "lg-cfg/contexts/main.ctx.md", "${tpl:/nope}");
        assert!(expand(dir.path(), "main").is_err());
    }

    #[test]
    fn markdown_include_normalizes_headings() {
        let dir = fixture();
        write(
            dir.path(),
            "lg-cfg/contexts/main.ctx.md",
            "## Docs\n${md:guide}\n",
        );
        write(dir.path(), "guide.md", "# Guide\n## Install\n");

        let (text, _) = expand(dir.path(), "main").unwrap();
        // Parent is H2 → content lands at H3; the guide's own H1 goes away.
        assert!(text.contains("## Docs"));
        assert!(text.contains("### Install"));
        assert!(!text.contains("# Guide\n"));
    }

    #[test]
    fn markdown_explicit_params_override() {
        let dir = fixture();
        write(
            dir.path(),
            "lg-cfg/contexts/main.ctx.md",
            "## Docs\n${md:guide,level:5,strip_h1:false}\n",
        );
        write(dir.path(), "guide.md", "# Guide\n## Install\n");

        let (text, _) = expand(dir.path(), "main").unwrap();
        assert!(text.contains("##### Guide"));
        assert!(text.contains("###### Install"));
    }

    #[test]
    fn markdown_glob_expands_alphabetically_and_rejects_anchor() {
        let dir = fixture();
        write(
            dir.path(),
            "lg-cfg/contexts/main.ctx.md",
            "${md:docs/*}",
        );
        write(dir.path(), "docs/b.md", "B");
        write(dir.path(), "docs/a.md", "A");

        let (text, _) = expand(dir.path(), "main").unwrap();
        assert_eq!(text, "A\n\nB");

        write(
            dir.path(),
            "lg-cfg/contexts/bad.ctx.md",
            "${md:docs/*#anchor}",
        );
        assert!(expand(dir.path(), "bad").is_err());
    }

    #[test]
    fn markdown_anchor_extracts_section() {
        let dir = fixture();
        write(
            dir.path(),
            "lg-cfg/contexts/main.ctx.md",
            "${md:guide#install,strip_h1:false,level:1}",
        );
        write(
            dir.path(),
            "guide.md",
            "# Guide\n## Install\nsteps\n## Other\nmore\n",
        );

        let (text, _) = expand(dir.path(), "main").unwrap();
        assert!(text.contains("Install"));
        assert!(text.contains("steps"));
        assert!(!text.contains("Other"));
    }

    #[test]
    fn cross_scope_section_reference() {
        let dir = fixture();
        write(
            dir.path(),
            "lg-cfg/contexts/main.ctx.md",
            "${tpl@apps/web:web-intro}",
        );
        write(
            dir.path(),
            "apps/web/lg-cfg/web-intro.tpl.md",
            "${web-src}",
        );
        write(
            dir.path(),
            "apps/web/lg-cfg/sections.yaml",
            "web-src:\n  extensions: ['.ts']\n",
        );

        let (text, seen) = expand(dir.path(), "main").unwrap();
        assert_eq!(text, "<apps/web::web-src>");
        assert_eq!(seen, vec!["apps/web::web-src".to_string()]);
    }

    #[test]
    fn unknown_section_is_fatal() {
        let dir = fixture();
        write(dir.path(), "lg-cfg/contexts/main.ctx.md", "${nope}");
        let err = expand(dir.path(), "main").unwrap_err();
        assert!(err.to_string().contains("unknown section"));
    }
}
