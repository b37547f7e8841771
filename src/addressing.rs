use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::CFG_DIR;
use crate::errors::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Section,
    Template,
    Context,
    /// `md@origin:path`: lives inside a scope's `lg-cfg/`.
    Markdown,
    /// `md:path`: lives in the scope's working tree, outside `lg-cfg/`.
    MarkdownExternal,
}

impl ResourceKind {
    fn extension(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Section => None,
            ResourceKind::Template => Some(".tpl.md"),
            ResourceKind::Context => Some(".ctx.md"),
            ResourceKind::Markdown | ResourceKind::MarkdownExternal => Some(".md"),
        }
    }
}

/// Typed `md` reference parameters (`level:3`, `strip_h1:true`).
#[derive(Debug, Clone, PartialEq)]
pub enum MdParam {
    Bool(bool),
    Int(i64),
    Str(String),
}

/// Syntactic form of a resource reference, before any filesystem lookup.
#[derive(Debug, Clone)]
pub struct ParsedPath {
    pub kind: ResourceKind,
    /// None = implicit (current scope); `"self"`/empty = explicit current.
    pub origin: Option<String>,
    pub origin_explicit: bool,
    pub path: String,
    pub is_absolute: bool,
    pub anchor: Option<String>,
    pub parameters: BTreeMap<String, MdParam>,
}

/// Fully resolved reference, ready for loading.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub kind: ResourceKind,
    pub scope_dir: PathBuf,
    pub scope_rel: String,
    pub cfg_root: PathBuf,
    pub resource_path: PathBuf,
    pub resource_rel: String,
    pub anchor: Option<String>,
    pub parameters: BTreeMap<String, MdParam>,
}

// ------------------------- parser -------------------------

fn bracket_origin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([^\]]+)\]:(.+)$").unwrap())
}

fn simple_origin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:]+):(.+)$").unwrap())
}

pub struct PathParser;

impl PathParser {
    pub fn parse(raw: &str, kind: ResourceKind) -> Result<ParsedPath> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(parse_err(raw, "empty path"));
        }

        if kind == ResourceKind::MarkdownExternal {
            return Self::parse_external_markdown(trimmed);
        }

        if let Some(rest) = trimmed.strip_prefix('@') {
            return Self::parse_with_origin(rest, kind, raw);
        }
        Self::parse_without_origin(trimmed, kind, raw)
    }

    /// `md:...` vs `md@origin:...`: the `@` decides internal vs external.
    pub fn parse_markdown(raw: &str, has_at: bool) -> Result<ParsedPath> {
        if has_at {
            Self::parse_with_origin(raw, ResourceKind::Markdown, raw)
        } else {
            Self::parse(raw, ResourceKind::MarkdownExternal)
        }
    }

    fn parse_with_origin(rest: &str, kind: ResourceKind, raw: &str) -> Result<ParsedPath> {
        if rest.starts_with(':') {
            return Err(parse_err(raw, "empty origin"));
        }

        let (origin, path_part) = if let Some(caps) = bracket_origin_re().captures(rest) {
            (caps[1].to_string(), caps[2].to_string())
        } else if let Some(caps) = simple_origin_re().captures(rest) {
            (caps[1].to_string(), caps[2].to_string())
        } else {
            return Err(parse_err(raw, "invalid origin format, expected `origin:path`"));
        };
        if origin.is_empty() {
            return Err(parse_err(raw, "empty origin"));
        }

        let (path, anchor, parameters) = parse_path_and_params(&path_part, kind, raw)?;
        let is_absolute = path.starts_with('/');
        Ok(ParsedPath {
            kind,
            origin: Some(origin),
            origin_explicit: true,
            path: path.trim_start_matches('/').to_string(),
            is_absolute,
            anchor,
            parameters,
        })
    }

    fn parse_without_origin(raw_path: &str, kind: ResourceKind, raw: &str) -> Result<ParsedPath> {
        let (path, anchor, parameters) = parse_path_and_params(raw_path, kind, raw)?;
        let is_absolute = path.starts_with('/');
        Ok(ParsedPath {
            kind,
            origin: None,
            origin_explicit: false,
            path: path.trim_start_matches('/').to_string(),
            is_absolute,
            anchor,
            parameters,
        })
    }

    /// External markdown always resolves against the scope root; a leading
    /// `/` is allowed but changes nothing.
    fn parse_external_markdown(raw: &str) -> Result<ParsedPath> {
        let (path, anchor, parameters) =
            parse_path_and_params(raw, ResourceKind::MarkdownExternal, raw)?;
        Ok(ParsedPath {
            kind: ResourceKind::MarkdownExternal,
            origin: None,
            origin_explicit: false,
            path: path.trim_start_matches('/').to_string(),
            is_absolute: false,
            anchor,
            parameters,
        })
    }
}

fn parse_err(raw: &str, message: &str) -> PipelineError {
    PipelineError::PathParse {
        raw: raw.to_string(),
        message: message.to_string(),
    }
}

/// `path#anchor,param:value,...` for md kinds; plain path otherwise.
fn parse_path_and_params(
    raw_path: &str,
    kind: ResourceKind,
    raw: &str,
) -> Result<(String, Option<String>, BTreeMap<String, MdParam>)> {
    if !matches!(kind, ResourceKind::Markdown | ResourceKind::MarkdownExternal) {
        return Ok((raw_path.to_string(), None, BTreeMap::new()));
    }

    let (head, params_part) = match raw_path.split_once(',') {
        Some((h, rest)) => (h, Some(rest)),
        None => (raw_path, None),
    };
    let (path, anchor) = match head.split_once('#') {
        Some((p, a)) => (p.trim().to_string(), Some(a.trim().to_string())),
        None => (head.trim().to_string(), None),
    };

    let mut parameters = BTreeMap::new();
    if let Some(params) = params_part {
        for part in params.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((name, value)) = part.split_once(':') else {
                return Err(parse_err(
                    raw,
                    &format!("invalid parameter `{part}`, expected `name:value`"),
                ));
            };
            let name = name.trim();
            let value = value.trim();
            let typed = match name {
                "strip_h1" => MdParam::Bool(matches!(value, "true" | "1" | "yes")),
                "level" => MdParam::Int(value.parse::<i64>().map_err(|_| {
                    parse_err(raw, &format!("parameter `level` must be an integer, got `{value}`"))
                })?),
                _ => MdParam::Str(value.to_string()),
            };
            parameters.insert(name.to_string(), typed);
        }
    }

    Ok((path, anchor, parameters))
}

// ------------------------- context stack -------------------------

/// One frame of the template-expansion stack: which scope we are in and the
/// current directory inside its `lg-cfg/`.
#[derive(Debug, Clone)]
pub struct DirectoryContext {
    pub origin: String,
    pub current_dir: String,
    pub cfg_root: PathBuf,
}

/// Directory stack governing relative resolution during one expansion. The
/// root frame is never popped.
pub struct AddressingContext {
    repo_root: PathBuf,
    stack: Vec<DirectoryContext>,
}

impl AddressingContext {
    pub fn new(repo_root: &Path, initial_cfg_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            stack: vec![DirectoryContext {
                origin: "self".to_string(),
                current_dir: String::new(),
                cfg_root: initial_cfg_root.to_path_buf(),
            }],
        }
    }

    pub fn current(&self) -> &DirectoryContext {
        self.stack.last().expect("root context is never popped")
    }

    pub fn cfg_root(&self) -> &Path {
        &self.current().cfg_root
    }

    pub fn current_dir(&self) -> &str {
        &self.current().current_dir
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, origin: String, current_dir: String, cfg_root: PathBuf) {
        self.stack.push(DirectoryContext {
            origin,
            current_dir,
            cfg_root,
        });
    }

    /// Enter the directory of a just-loaded resource file.
    pub fn push_for_resource(&mut self, resolved: &ResolvedPath) {
        let current_dir = Path::new(&resolved.resource_rel)
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        let origin = if resolved.scope_rel.is_empty() {
            "self".to_string()
        } else {
            resolved.scope_rel.clone()
        };
        self.push(origin, current_dir, resolved.cfg_root.clone());
    }

    pub fn pop(&mut self) -> DirectoryContext {
        assert!(self.stack.len() > 1, "cannot pop root addressing context");
        self.stack.pop().expect("stack is non-empty")
    }
}

// ------------------------- resolver -------------------------

pub struct PathResolver {
    repo_root: PathBuf,
}

impl PathResolver {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
        }
    }

    pub fn resolve(&self, parsed: &ParsedPath, ctx: &AddressingContext) -> Result<ResolvedPath> {
        if parsed.kind == ResourceKind::MarkdownExternal {
            return self.resolve_external_markdown(parsed, ctx);
        }

        let (scope_dir, scope_rel, cfg_root) = self.resolve_scope(parsed, ctx)?;

        let base_dir = if parsed.is_absolute {
            ""
        } else {
            ctx.current_dir()
        };
        let resource_rel = normalize_within_cfg(&parsed.path, base_dir)?;
        let resource_rel = add_extension(&resource_rel, parsed.kind);
        let resource_path = cfg_root.join(&resource_rel);

        Ok(ResolvedPath {
            kind: parsed.kind,
            scope_dir,
            scope_rel,
            cfg_root,
            resource_path,
            resource_rel,
            anchor: parsed.anchor.clone(),
            parameters: parsed.parameters.clone(),
        })
    }

    /// Resolve just the scope of a reference: `(scope_dir, scope_rel,
    /// cfg_root)`. Section references need this without the file-path part.
    pub fn scope_for(
        &self,
        parsed: &ParsedPath,
        ctx: &AddressingContext,
    ) -> Result<(PathBuf, String, PathBuf)> {
        self.resolve_scope(parsed, ctx)
    }

    fn resolve_scope(
        &self,
        parsed: &ParsedPath,
        ctx: &AddressingContext,
    ) -> Result<(PathBuf, String, PathBuf)> {
        let origin = parsed.origin.as_deref();

        // Implicit, `self` or empty → the current frame's scope.
        if matches!(origin, None | Some("self") | Some("")) {
            let cfg_root = ctx.cfg_root().to_path_buf();
            let scope_dir = cfg_root
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.repo_root.clone());
            let scope_rel = self.rel_to_root(&scope_dir);
            return Ok((scope_dir, scope_rel, cfg_root));
        }

        // `/` → the repo-root scope, explicitly.
        if origin == Some("/") {
            let cfg_root = self.repo_root.join(CFG_DIR);
            if !cfg_root.is_dir() {
                return Err(PipelineError::ScopeNotFound {
                    scope: "/".to_string(),
                });
            }
            return Ok((self.repo_root.clone(), String::new(), cfg_root));
        }

        // Anything else is a directory relative to the current scope.
        let origin = origin.expect("checked above");
        let current_scope_dir = ctx
            .cfg_root()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.repo_root.clone());
        let scope_dir = current_scope_dir.join(origin);
        let cfg_root = scope_dir.join(CFG_DIR);
        if !cfg_root.is_dir() {
            return Err(PipelineError::ScopeNotFound {
                scope: origin.to_string(),
            });
        }
        let scope_rel = self.rel_to_root(&scope_dir);
        Ok((scope_dir, scope_rel, cfg_root))
    }

    fn resolve_external_markdown(
        &self,
        parsed: &ParsedPath,
        ctx: &AddressingContext,
    ) -> Result<ResolvedPath> {
        let resource_rel = add_extension(&normalize_plain(&parsed.path, parsed)?, parsed.kind);
        let cfg_root = ctx.cfg_root().to_path_buf();
        let scope_dir = cfg_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.repo_root.clone());
        let resource_path = scope_dir.join(&resource_rel);
        let scope_rel = self.rel_to_root(&scope_dir);

        Ok(ResolvedPath {
            kind: parsed.kind,
            scope_dir,
            scope_rel,
            cfg_root,
            resource_path,
            resource_rel,
            anchor: parsed.anchor.clone(),
            parameters: parsed.parameters.clone(),
        })
    }

    fn rel_to_root(&self, dir: &Path) -> String {
        dir.strip_prefix(&self.repo_root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default()
    }
}

/// Join against the base directory and normalize `.`/`..`, refusing any
/// traversal that would leave `lg-cfg/`.
fn normalize_within_cfg(path: &str, base_dir: &str) -> Result<String> {
    let work = if base_dir.is_empty() {
        path.to_string()
    } else {
        format!("{base_dir}/{path}")
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in work.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(PipelineError::PathResolution {
                        path: path.to_string(),
                        message: format!("path escapes {CFG_DIR}/ boundary"),
                    });
                }
            }
            p => parts.push(p),
        }
    }
    Ok(parts.join("/"))
}

/// External-markdown normalization: `..` may move within the scope but not
/// above it.
fn normalize_plain(path: &str, parsed: &ParsedPath) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(PipelineError::PathResolution {
                        path: parsed.path.clone(),
                        message: "path escapes scope boundary".to_string(),
                    });
                }
            }
            p => parts.push(p),
        }
    }
    Ok(parts.join("/"))
}

fn add_extension(path: &str, kind: ResourceKind) -> String {
    let Some(ext) = kind.extension() else {
        return path.to_string();
    };
    if path.ends_with(ext) {
        return path.to_string();
    }
    if matches!(kind, ResourceKind::Markdown | ResourceKind::MarkdownExternal)
        && (path.ends_with(".md") || path.ends_with(".markdown"))
    {
        return path.to_string();
    }
    format!("{path}{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_template_reference() {
        let p = PathParser::parse("docs/intro", ResourceKind::Template).unwrap();
        assert!(p.origin.is_none());
        assert!(!p.is_absolute);
        assert_eq!(p.path, "docs/intro");
    }

    #[test]
    fn parses_origin_and_absolute_path() {
        let p = PathParser::parse("@apps/web:/shared/head", ResourceKind::Template).unwrap();
        assert_eq!(p.origin.as_deref(), Some("apps/web"));
        assert!(p.origin_explicit);
        assert!(p.is_absolute);
        assert_eq!(p.path, "shared/head");
    }

    #[test]
    fn bracket_origin_allows_colons() {
        let p = PathParser::parse("@[apps:v2]:intro", ResourceKind::Template).unwrap();
        assert_eq!(p.origin.as_deref(), Some("apps:v2"));
        assert_eq!(p.path, "intro");
    }

    #[test]
    fn empty_origin_is_an_error() {
        assert!(PathParser::parse("@:intro", ResourceKind::Template).is_err());
    }

    #[test]
    fn md_anchor_and_typed_params() {
        let p = PathParser::parse(
            "guide#setup,level:3,strip_h1:true,tag:x",
            ResourceKind::MarkdownExternal,
        )
        .unwrap();
        assert_eq!(p.anchor.as_deref(), Some("setup"));
        assert_eq!(p.parameters.get("level"), Some(&MdParam::Int(3)));
        assert_eq!(p.parameters.get("strip_h1"), Some(&MdParam::Bool(true)));
        assert_eq!(
            p.parameters.get("tag"),
            Some(&MdParam::Str("x".to_string()))
        );
    }

    #[test]
    fn bad_level_param_is_an_error() {
        let err = PathParser::parse("guide,level:three", ResourceKind::MarkdownExternal);
        assert!(err.is_err());
    }

    fn scope_fixture() -> (tempfile::TempDir, PathResolver) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lg-cfg/contexts")).unwrap();
        std::fs::create_dir_all(dir.path().join("apps/web/lg-cfg")).unwrap();
        let resolver = PathResolver::new(dir.path());
        (dir, resolver)
    }

    #[test]
    fn resolves_relative_to_current_dir() {
        let (dir, resolver) = scope_fixture();
        let mut ctx = AddressingContext::new(dir.path(), &dir.path().join("lg-cfg"));
        ctx.push(
            "self".to_string(),
            "contexts".to_string(),
            dir.path().join("lg-cfg"),
        );

        let parsed = PathParser::parse("intro", ResourceKind::Template).unwrap();
        let resolved = resolver.resolve(&parsed, &ctx).unwrap();
        assert_eq!(resolved.resource_rel, "contexts/intro.tpl.md");

        let parsed = PathParser::parse("/intro", ResourceKind::Template).unwrap();
        let resolved = resolver.resolve(&parsed, &ctx).unwrap();
        assert_eq!(resolved.resource_rel, "intro.tpl.md");
    }

    #[test]
    fn dotdot_stays_inside_cfg() {
        let (dir, resolver) = scope_fixture();
        let mut ctx = AddressingContext::new(dir.path(), &dir.path().join("lg-cfg"));
        ctx.push(
            "self".to_string(),
            "contexts".to_string(),
            dir.path().join("lg-cfg"),
        );

        let parsed = PathParser::parse("../shared", ResourceKind::Template).unwrap();
        let resolved = resolver.resolve(&parsed, &ctx).unwrap();
        assert_eq!(resolved.resource_rel, "shared.tpl.md");

        let parsed = PathParser::parse("../../escape", ResourceKind::Template).unwrap();
        assert!(resolver.resolve(&parsed, &ctx).is_err());
    }

    #[test]
    fn nested_scope_resolution() {
        let (dir, resolver) = scope_fixture();
        let ctx = AddressingContext::new(dir.path(), &dir.path().join("lg-cfg"));

        let parsed = PathParser::parse("@apps/web:web-intro", ResourceKind::Template).unwrap();
        let resolved = resolver.resolve(&parsed, &ctx).unwrap();
        assert_eq!(resolved.scope_rel, "apps/web");
        assert_eq!(
            resolved.resource_path,
            dir.path().join("apps/web/lg-cfg/web-intro.tpl.md")
        );

        let parsed = PathParser::parse("@no/such:thing", ResourceKind::Template).unwrap();
        assert!(matches!(
            resolver.resolve(&parsed, &ctx),
            Err(PipelineError::ScopeNotFound { .. })
        ));
    }

    #[test]
    fn external_markdown_resolves_against_scope_root() {
        let (dir, resolver) = scope_fixture();
        let ctx = AddressingContext::new(dir.path(), &dir.path().join("lg-cfg"));

        let parsed = PathParser::parse_markdown("docs/readme", false).unwrap();
        let resolved = resolver.resolve(&parsed, &ctx).unwrap();
        assert_eq!(resolved.resource_path, dir.path().join("docs/readme.md"));
        assert_eq!(resolved.kind, ResourceKind::MarkdownExternal);
    }

    #[test]
    fn resolution_depends_only_on_top_of_stack() {
        let (dir, resolver) = scope_fixture();
        let mut ctx = AddressingContext::new(dir.path(), &dir.path().join("lg-cfg"));
        let parsed = PathParser::parse("intro", ResourceKind::Template).unwrap();
        let a = resolver.resolve(&parsed, &ctx).unwrap();

        // Push and pop an unrelated frame: resolution is unchanged.
        ctx.push(
            "apps/web".to_string(),
            "sub".to_string(),
            dir.path().join("apps/web/lg-cfg"),
        );
        ctx.pop();
        let b = resolver.resolve(&parsed, &ctx).unwrap();
        assert_eq!(a.resource_path, b.resource_path);
    }
}
