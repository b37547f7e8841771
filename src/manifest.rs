use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::config::{language_for_extension, Config, EmptyPolicy, Section};
use crate::errors::Diagnostics;
use crate::filters::FilterEngine;
use crate::vcs::Vcs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    All,
    Changes,
}

/// One file selected for the listing. Immutable after manifest build.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub abs_path: PathBuf,
    /// POSIX-relative to the repo root (not the owning scope).
    pub rel_path: String,
    /// Qualified id of the owning section (`apps/web::src` for nested
    /// scopes, plain canonical id at the root).
    pub section: String,
    pub multiplicity: usize,
    /// Fence language tag; empty for markdown/plain text.
    pub language_hint: String,
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub files: Vec<FileRef>,
}

/// Section multiplicities collected from a context template (or a single
/// `sec:` target), keyed by qualified id.
#[derive(Debug, Clone, Default)]
pub struct SectionUsage {
    pub by_id: BTreeMap<String, usize>,
}

/// A section bound to the scope that declared it. The walk starts at the
/// scope dir and filters evaluate scope-relative, while `FileRef.rel_path`
/// stays repo-relative.
#[derive(Debug, Clone)]
pub struct SectionBinding {
    pub qualified_id: String,
    pub scope_dir: PathBuf,
    pub scope_rel: String,
    pub section: Section,
    pub multiplicity: usize,
}

/// Root-scope shortcut: turn a usage map into bindings against one config.
pub fn bindings_from_usage(
    root: &Path,
    usage: &SectionUsage,
    config: &Config,
    diags: &mut Diagnostics,
) -> Vec<SectionBinding> {
    let mut out = Vec::new();
    for (id, mult) in &usage.by_id {
        let Some(section) = config.section(id) else {
            diags.warn(format!("manifest: unknown section `{id}`"));
            continue;
        };
        out.push(SectionBinding {
            qualified_id: id.clone(),
            scope_dir: root.to_path_buf(),
            scope_rel: String::new(),
            section: section.clone(),
            multiplicity: (*mult).max(1),
        });
    }
    out
}

pub fn build_manifest(
    root: &Path,
    bindings: &[SectionBinding],
    mode: RunMode,
    vcs: &dyn Vcs,
    diags: &mut Diagnostics,
) -> Manifest {
    let changed = match mode {
        RunMode::Changes => vcs.changed_files(root),
        RunMode::All => Default::default(),
    };

    let mut files = Vec::new();

    for binding in bindings {
        let section = &binding.section;
        let engine = Arc::new(FilterEngine::new(&section.cfg.filters, diags));
        let extensions: Vec<String> = section
            .cfg
            .extensions
            .iter()
            .map(|e| {
                let e = e.to_lowercase();
                if e.starts_with('.') {
                    e
                } else {
                    format!(".{e}")
                }
            })
            .collect();

        for entry in walk_scope(&binding.scope_dir, Arc::clone(&engine)) {
            let scope_rel = rel_posix(&entry, &binding.scope_dir);
            let repo_rel = rel_posix(&entry, root);

            if !has_extension(&entry, &extensions) {
                continue;
            }
            if !engine.includes(&scope_rel) {
                continue;
            }
            if mode == RunMode::Changes && !changed.contains(&repo_rel) {
                continue;
            }
            if should_skip_content(&entry, &repo_rel, section, diags) {
                continue;
            }

            let ext = dot_extension(&entry);
            files.push(FileRef {
                abs_path: entry.clone(),
                rel_path: repo_rel,
                section: binding.qualified_id.clone(),
                multiplicity: binding.multiplicity.max(1),
                language_hint: fence_hint(language_for_extension(&ext)).to_string(),
            });
        }
    }

    files.sort_by(|a, b| (&a.section, &a.rel_path).cmp(&(&b.section, &b.rel_path)));
    Manifest { files }
}

/// Walk one scope honoring `.gitignore` (standard filters of the `ignore`
/// crate) and pruning early wherever the section filter cannot match.
fn walk_scope(scope_dir: &Path, engine: Arc<FilterEngine>) -> Vec<PathBuf> {
    let filter_root = scope_dir.to_path_buf();
    let filter_engine = Arc::clone(&engine);

    let walker = WalkBuilder::new(scope_dir)
        .standard_filters(true)
        .require_git(false) // honor .gitignore even outside a git checkout
        .filter_entry(move |dent| {
            if !dent.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                return true;
            }
            let rel = match dent.path().strip_prefix(&filter_root) {
                Ok(r) => r.to_string_lossy().replace('\\', "/"),
                Err(_) => return true,
            };
            if rel.is_empty() {
                return true;
            }
            // The config tree never lists itself unless a filter opts it in.
            let is_cfg_dir = rel == crate::config::CFG_DIR
                || rel.ends_with(&format!("/{}", crate::config::CFG_DIR));
            if is_cfg_dir && !filter_engine.explicitly_allows_under(&rel) {
                return false;
            }
            filter_engine.may_descend(&rel)
        })
        .build();

    let mut out = Vec::new();
    for item in walker {
        let Ok(dent) = item else { continue };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        out.push(dent.into_path());
    }
    out
}

fn rel_posix(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn dot_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let ext = dot_extension(path);
    !ext.is_empty() && extensions.iter().any(|e| *e == ext)
}

fn fence_hint(language: &str) -> &str {
    match language {
        "markdown" | "" => "",
        other => other,
    }
}

/// Empty-content policy plus the Python trivial-`__init__.py` rule.
fn should_skip_content(path: &Path, rel: &str, section: &Section, diags: &mut Diagnostics) -> bool {
    let ext = dot_extension(path);
    let language = language_for_extension(&ext);

    let size = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) => {
            diags.warn(format!("manifest: cannot stat `{rel}`: {e}"));
            return true;
        }
    };

    if size == 0 {
        let policy = match language {
            "python" => section.cfg.python.empty_policy,
            "typescript" => section.cfg.typescript.empty_policy,
            "rust" => section.cfg.rust.empty_policy,
            "markdown" => section.cfg.markdown.empty_policy,
            _ => EmptyPolicy::Inherit,
        };
        let exclude = match policy {
            EmptyPolicy::Include => false,
            EmptyPolicy::Exclude => true,
            EmptyPolicy::Inherit => section.cfg.skip_empty,
        };
        if exclude {
            return true;
        }
    }

    if language == "python"
        && section.cfg.python.skip_trivial_inits
        && path.file_name().and_then(|n| n.to_str()) == Some("__init__.py")
    {
        if let Ok(text) = std::fs::read_to_string(path) {
            let significant: Vec<&str> = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .collect();
            let limit = section.cfg.python.trivial_init_max_noncomment;
            if significant.len() <= limit && significant.iter().all(|l| *l == "pass" || *l == "...")
            {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CFG_DIR;
    use crate::vcs::NullVcs;
    use std::collections::BTreeSet;

    fn write(root: &Path, rel: &str, text: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, text).unwrap();
    }

    fn setup(sections_yaml: &str) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let cfg_root = dir.path().join(CFG_DIR);
        std::fs::create_dir_all(&cfg_root).unwrap();
        std::fs::write(cfg_root.join("sections.yaml"), sections_yaml).unwrap();
        let cfg = Config::load(&cfg_root).unwrap();
        (dir, cfg)
    }

    fn usage(id: &str) -> SectionUsage {
        let mut u = SectionUsage::default();
        u.by_id.insert(id.to_string(), 1);
        u
    }

    fn manifest_for(dir: &Path, cfg: &Config, id: &str, mode: RunMode, vcs: &dyn Vcs) -> Manifest {
        let mut diags = Diagnostics::default();
        let bindings = bindings_from_usage(dir, &usage(id), cfg, &mut diags);
        build_manifest(dir, &bindings, mode, vcs, &mut diags)
    }

    #[test]
    fn collects_and_sorts_matching_files() {
        let (dir, cfg) =
            setup("core:\n  extensions: ['.py']\n  filters: {mode: allow, allow: ['src/**']}\n");
        write(dir.path(), "src/b.py", "x = 1\n");
        write(dir.path(), "src/a.py", "y = 2\n");
        write(dir.path(), "src/readme.md", "# no\n");
        write(dir.path(), "other/c.py", "z = 3\n");

        let m = manifest_for(dir.path(), &cfg, "core", RunMode::All, &NullVcs);
        let rels: Vec<&str> = m.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["src/a.py", "src/b.py"]);
    }

    #[test]
    fn changes_mode_restricts_to_changed_set() {
        struct FakeVcs;
        impl Vcs for FakeVcs {
            fn changed_files(&self, _root: &Path) -> BTreeSet<String> {
                ["src/a.py".to_string()].into_iter().collect()
            }
        }

        let (dir, cfg) = setup("core:\n  extensions: ['.py']\n");
        write(dir.path(), "src/a.py", "x = 1\n");
        write(dir.path(), "src/b.py", "y = 2\n");

        let m = manifest_for(dir.path(), &cfg, "core", RunMode::Changes, &FakeVcs);
        let rels: Vec<&str> = m.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["src/a.py"]);
    }

    #[test]
    fn empty_policy_overrides_section_rule() {
        let (dir, cfg) = setup(
            "core:\n  extensions: ['.py', '.md']\n  skip_empty: true\n  python: {empty_policy: include}\n",
        );
        write(dir.path(), "a.py", "");
        write(dir.path(), "b.md", "");

        let m = manifest_for(dir.path(), &cfg, "core", RunMode::All, &NullVcs);
        let rels: Vec<&str> = m.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["a.py"]);
    }

    #[test]
    fn trivial_init_files_are_skipped() {
        let (dir, cfg) = setup("core:\n  extensions: ['.py']\n");
        write(dir.path(), "pkg/__init__.py", "# package marker\npass\n");
        write(dir.path(), "pkg/real.py", "def f():\n    return 1\n");

        let m = manifest_for(dir.path(), &cfg, "core", RunMode::All, &NullVcs);
        let rels: Vec<&str> = m.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["pkg/real.py"]);
    }

    #[test]
    fn cfg_dir_is_never_listed_by_default() {
        let (dir, cfg) = setup("core:\n  extensions: ['.yaml', '.py']\n");
        write(dir.path(), "src/a.py", "x = 1\n");

        let m = manifest_for(dir.path(), &cfg, "core", RunMode::All, &NullVcs);
        assert!(m.files.iter().all(|f| !f.rel_path.starts_with("lg-cfg/")));
        assert_eq!(m.files.len(), 1);
    }

    #[test]
    fn nested_scope_binding_walks_the_scope() {
        let (dir, _) = setup("root:\n  extensions: ['.py']\n");
        let web_cfg = dir.path().join("apps/web").join(CFG_DIR);
        std::fs::create_dir_all(&web_cfg).unwrap();
        std::fs::write(
            web_cfg.join("sections.yaml"),
            "web-src:\n  extensions: ['.ts']\n  filters: {mode: allow, allow: ['src/**']}\n",
        )
        .unwrap();
        write(dir.path(), "apps/web/src/index.ts", "export const x = 1;\n");
        write(dir.path(), "src/outside.ts", "export const y = 2;\n");

        let web = Config::load(&web_cfg).unwrap();
        let binding = SectionBinding {
            qualified_id: "apps/web::web-src".to_string(),
            scope_dir: dir.path().join("apps/web"),
            scope_rel: "apps/web".to_string(),
            section: web.section("web-src").unwrap().clone(),
            multiplicity: 1,
        };

        let mut diags = Diagnostics::default();
        let m = build_manifest(dir.path(), &[binding], RunMode::All, &NullVcs, &mut diags);
        let rels: Vec<&str> = m.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["apps/web/src/index.ts"]);
        assert_eq!(m.files[0].section, "apps/web::web-src");
    }
}
