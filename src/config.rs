use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};
use crate::filters::FilterNode;

pub const SCHEMA_VERSION: u32 = 1;
pub const CFG_DIR: &str = "lg-cfg";
pub const CONTEXTS_DIR: &str = "contexts";

/// Global settings from `lg-cfg/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GlobalCfg {
    pub schema_version: u32,
    /// Estimator granularity for models without a real BPE backend.
    pub chars_per_token: usize,
    pub cache_enabled: bool,
    pub path_labels: PathLabelMode,
}

impl Default for GlobalCfg {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            chars_per_token: crate::tokenizer::DEFAULT_CHARS_PER_TOKEN,
            cache_enabled: true,
            path_labels: PathLabelMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathLabelMode {
    #[default]
    Auto,
    Relative,
    Basename,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPolicy {
    #[default]
    Inherit,
    Include,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentPolicy {
    #[default]
    KeepAll,
    KeepDoc,
    KeepFirstSentence,
    StripAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyPolicy {
    #[default]
    Keep,
    StripAll,
    Trim,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FunctionBodyCfg {
    pub policy: BodyPolicy,
    /// Glob patterns on element names that are always kept.
    pub except_patterns: Vec<String>,
    /// Decorator/annotation substrings that force keeping the body.
    pub keep_annotated: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ImportsCfg {
    pub strip_local: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LiteralsCfg {
    /// Per-literal token budget; `None` disables literal trimming.
    pub max_tokens: Option<usize>,
}

/// Per-language optimizer settings inside a section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CodeLangCfg {
    pub empty_policy: EmptyPolicy,
    pub public_api: bool,
    pub comments: CommentPolicy,
    pub imports: ImportsCfg,
    pub function_bodies: FunctionBodyCfg,
    pub literals: LiteralsCfg,
    /// Per-file token target driving the escalation ladder; `None` disables it.
    pub max_file_tokens: Option<usize>,
    /// Python only: drop `__init__.py` files that carry no real code.
    pub skip_trivial_inits: bool,
    pub trivial_init_max_noncomment: usize,
}

impl Default for CodeLangCfg {
    fn default() -> Self {
        Self {
            empty_policy: EmptyPolicy::Inherit,
            public_api: false,
            comments: CommentPolicy::KeepAll,
            imports: ImportsCfg::default(),
            function_bodies: FunctionBodyCfg::default(),
            literals: LiteralsCfg::default(),
            max_file_tokens: None,
            skip_trivial_inits: true,
            trivial_init_max_noncomment: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MarkdownCfg {
    /// Target level for the smallest heading; `None` disables normalization.
    pub max_heading_level: Option<usize>,
    pub empty_policy: EmptyPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SectionCfg {
    pub extensions: Vec<String>,
    pub filters: FilterNode,
    pub code_fence: bool,
    pub skip_empty: bool,
    pub python: CodeLangCfg,
    pub typescript: CodeLangCfg,
    pub rust: CodeLangCfg,
    pub markdown: MarkdownCfg,
}

impl Default for SectionCfg {
    fn default() -> Self {
        Self {
            extensions: vec![".py".to_string()],
            filters: FilterNode::default(),
            code_fence: true,
            skip_empty: true,
            python: CodeLangCfg::default(),
            typescript: CodeLangCfg::default(),
            rust: CodeLangCfg::default(),
            markdown: MarkdownCfg::default(),
        }
    }
}

/// A section together with its run-wide identity.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    /// Globally-unique id: the plain name for `sections.yaml` entries,
    /// `<fragment-path-within-cfg>/<name>` for `*.sec.yaml` fragments.
    pub canonical_id: String,
    pub cfg: SectionCfg,
}

/// Parsed configuration of one scope (`<scope>/lg-cfg/`).
#[derive(Debug, Clone)]
pub struct Config {
    pub cfg_root: PathBuf,
    pub global: GlobalCfg,
    pub sections: BTreeMap<String, Section>,
}

impl Config {
    /// Load `config.yaml`, `sections.yaml` and every `*.sec.yaml` fragment
    /// under `cfg_root`. Schema mismatches and unknown fields are fatal.
    pub fn load(cfg_root: &Path) -> Result<Self> {
        if !cfg_root.is_dir() {
            return Err(PipelineError::Config(format!(
                "config directory not found: {}",
                cfg_root.display()
            )));
        }

        let global = Self::load_global(cfg_root)?;
        let mut sections: BTreeMap<String, Section> = BTreeMap::new();

        let main = cfg_root.join("sections.yaml");
        if main.is_file() {
            for (name, cfg) in Self::load_section_file(&main)? {
                let canonical_id = name.clone();
                sections.insert(
                    canonical_id.clone(),
                    Section {
                        name,
                        canonical_id,
                        cfg,
                    },
                );
            }
        }

        for fragment in Self::find_fragments(cfg_root) {
            let rel = fragment
                .strip_prefix(cfg_root)
                .unwrap_or(&fragment)
                .to_string_lossy()
                .replace('\\', "/");
            let prefix = rel
                .strip_suffix(".sec.yaml")
                .unwrap_or(rel.as_str())
                .to_string();
            for (name, cfg) in Self::load_section_file(&fragment)? {
                let canonical_id = format!("{prefix}/{name}");
                sections.insert(
                    canonical_id.clone(),
                    Section {
                        name,
                        canonical_id,
                        cfg,
                    },
                );
            }
        }

        Ok(Self {
            cfg_root: cfg_root.to_path_buf(),
            global,
            sections,
        })
    }

    fn load_global(cfg_root: &Path) -> Result<GlobalCfg> {
        let path = cfg_root.join("config.yaml");
        if !path.is_file() {
            return Ok(GlobalCfg::default());
        }
        let text = std::fs::read_to_string(&path)?;
        let global: GlobalCfg = serde_yaml::from_str(&text)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        if global.schema_version != SCHEMA_VERSION {
            return Err(PipelineError::Config(format!(
                "unsupported config schema {} (tool expects {})",
                global.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(global)
    }

    fn load_section_file(path: &Path) -> Result<BTreeMap<String, SectionCfg>> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))
    }

    fn find_fragments(cfg_root: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack = vec![cfg_root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let p = entry.path();
                if p.is_dir() {
                    stack.push(p);
                } else if p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".sec.yaml"))
                {
                    out.push(p);
                }
            }
        }
        out.sort();
        out
    }

    pub fn section(&self, canonical_id: &str) -> Option<&Section> {
        self.sections.get(canonical_id)
    }

    /// Scoped lookup used by the template engine: a bare name first resolves
    /// against the including file's directory within the config tree, then
    /// globally.
    pub fn find_section(&self, name: &str, current_dir: &str) -> Option<&Section> {
        if !current_dir.is_empty() {
            let scoped = format!("{current_dir}/{name}");
            if let Some(sec) = self.sections.get(&scoped) {
                return Some(sec);
            }
        }
        self.sections.get(name)
    }

    pub fn section_ids(&self) -> Vec<String> {
        self.sections.keys().cloned().collect()
    }

    /// Available context names: `contexts/**/*.ctx.md` minus the extension.
    pub fn list_contexts(&self) -> Vec<String> {
        let base = self.cfg_root.join(CONTEXTS_DIR);
        let mut out = Vec::new();
        let mut stack = vec![base.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let p = entry.path();
                if p.is_dir() {
                    stack.push(p);
                } else if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                    if let Some(stem) = name.strip_suffix(".ctx.md") {
                        let rel_dir = p
                            .parent()
                            .and_then(|d| d.strip_prefix(&base).ok())
                            .map(|d| d.to_string_lossy().replace('\\', "/"))
                            .unwrap_or_default();
                        if rel_dir.is_empty() {
                            out.push(stem.to_string());
                        } else {
                            out.push(format!("{rel_dir}/{stem}"));
                        }
                    }
                }
            }
        }
        out.sort();
        out
    }
}

/// Pick the language key for a file extension (with leading dot).
pub fn language_for_extension(ext: &str) -> &'static str {
    match ext {
        ".py" => "python",
        ".ts" | ".tsx" | ".js" | ".jsx" | ".mts" | ".cts" | ".mjs" | ".cjs" => "typescript",
        ".rs" => "rust",
        ".md" | ".markdown" => "markdown",
        _ => "",
    }
}
