use std::collections::BTreeMap;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::errors::Diagnostics;

/// Declarative allow/block rule tree from section config.
///
/// Patterns at a node are evaluated against the path *relative to that
/// node's directory*; `children[dir]` overrides the parent's decision for
/// everything underneath `dir`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FilterNode {
    pub mode: FilterMode,
    pub allow: Vec<String>,
    pub block: Vec<String>,
    pub children: BTreeMap<String, FilterNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Allow,
    #[default]
    Block,
}

struct CompiledNode {
    mode: FilterMode,
    allow: Vec<Pattern>,
    block: Vec<Pattern>,
    children: BTreeMap<String, CompiledNode>,
}

/// Pure path-decision engine over a compiled [`FilterNode`] tree. Never
/// touches the filesystem.
pub struct FilterEngine {
    root: CompiledNode,
}

/// Shell-style matching: `*` stays within one component, `**` recurses.
const MATCH_OPTS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn to_patterns(globs: &[String], at: &str, diags: &mut Diagnostics) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|g| match Pattern::new(g) {
            Ok(p) => Some(p),
            Err(e) => {
                diags.warn(format!("filter: invalid glob `{g}` at `{at}`: {e}"));
                None
            }
        })
        .collect()
}

fn compile(node: &FilterNode, at: &str, diags: &mut Diagnostics) -> CompiledNode {
    if node.mode == FilterMode::Allow && node.allow.is_empty() {
        diags.warn(format!(
            "filter: allow-mode node at `{}` has an empty allow list; it matches nothing",
            if at.is_empty() { "." } else { at }
        ));
    }

    let allow = to_patterns(&node.allow, at, diags);
    let block = to_patterns(&node.block, at, diags);

    CompiledNode {
        mode: node.mode,
        allow,
        block,
        children: node
            .children
            .iter()
            .map(|(name, child)| {
                let child_at = if at.is_empty() {
                    name.clone()
                } else {
                    format!("{at}/{name}")
                };
                (name.clone(), compile(child, &child_at, diags))
            })
            .collect(),
    }
}

impl FilterEngine {
    pub fn new(root: &FilterNode, diags: &mut Diagnostics) -> Self {
        Self {
            root: compile(root, "", diags),
        }
    }

    /// Decide whether a POSIX-relative file path is part of the section.
    pub fn includes(&self, rel_path: &str) -> bool {
        let (node, rest) = self.descend(rel_path);
        node.decide(&rest)
    }

    /// Directory pruning aid. Must stay over-permissive: returning `false`
    /// guarantees no file under `rel_dir` can be included.
    pub fn may_descend(&self, rel_dir: &str) -> bool {
        let (node, rest) = self.descend(rel_dir);

        if rest.is_empty() {
            // Landed exactly on a filter node: descend unless the subtree
            // cannot possibly match anything.
            return node.subtree_can_allow();
        }

        if node.block.iter().any(|p| p.matches_with(&rest, MATCH_OPTS)) {
            return false;
        }

        match node.mode {
            FilterMode::Block => true,
            FilterMode::Allow => node.allow.iter().any(|p| could_match_under(p, &rest)),
        }
    }

    /// True when the filter tree names `rel_dir` explicitly: either a child
    /// node covers it, or an allow pattern can reach under it. Used to let
    /// config trees opt `lg-cfg/` itself into a listing.
    pub fn explicitly_allows_under(&self, rel_dir: &str) -> bool {
        let (node, rest) = self.descend(rel_dir);
        if rest.is_empty() {
            return node.subtree_can_allow();
        }
        node.mode == FilterMode::Allow && node.allow.iter().any(|p| could_match_under(p, &rest))
    }

    /// Walk to the deepest child node along leading path components; returns
    /// that node and the remaining path relative to it.
    fn descend(&self, rel: &str) -> (&CompiledNode, String) {
        let mut node = &self.root;
        let mut parts: Vec<&str> = rel.split('/').filter(|p| !p.is_empty()).collect();

        loop {
            let Some(head) = parts.first().copied() else {
                break;
            };
            if !node.children.contains_key(head) {
                break;
            }
            node = &node.children[head];
            parts.remove(0);
        }

        (node, parts.join("/"))
    }
}

impl CompiledNode {
    fn decide(&self, rel: &str) -> bool {
        if self.block.iter().any(|p| p.matches_with(rel, MATCH_OPTS)) {
            return false;
        }
        match self.mode {
            FilterMode::Allow => self.allow.iter().any(|p| p.matches_with(rel, MATCH_OPTS)),
            FilterMode::Block => true,
        }
    }

    fn subtree_can_allow(&self) -> bool {
        match self.mode {
            FilterMode::Block => true,
            FilterMode::Allow => {
                !self.allow.is_empty() || self.children.values().any(|c| c.subtree_can_allow())
            }
        }
    }
}

/// Conservative test: could `pattern` match some path strictly under `dir`?
/// Component-wise prefix match, with `**` free to swallow any number of
/// leading directory components.
fn could_match_under(pattern: &Pattern, dir: &str) -> bool {
    if pattern.matches_with(dir, MATCH_OPTS) {
        return true;
    }
    let pat_parts: Vec<&str> = pattern.as_str().split('/').collect();
    let dir_parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    prefix_match(&pat_parts, &dir_parts)
}

fn prefix_match(pat: &[&str], dir: &[&str]) -> bool {
    if dir.is_empty() {
        // All directory components matched; the rest of the pattern can
        // still match files below.
        return !pat.is_empty();
    }
    let Some(head) = pat.first() else {
        return false;
    };
    if *head == "**" {
        return (0..=dir.len()).any(|k| prefix_match(&pat[1..], &dir[k..]));
    }
    Pattern::new(head)
        .map(|p| p.matches_with(dir[0], MATCH_OPTS))
        .unwrap_or(false)
        && prefix_match(&pat[1..], &dir[1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(yaml: &str) -> (FilterEngine, Diagnostics) {
        let node: FilterNode = serde_yaml::from_str(yaml).unwrap();
        let mut diags = Diagnostics::default();
        let eng = FilterEngine::new(&node, &mut diags);
        (eng, diags)
    }

    #[test]
    fn block_mode_allows_everything_not_blocked() {
        let (eng, _) = engine("{mode: block, block: ['**/*.lock', 'gen/**']}");
        assert!(eng.includes("src/main.rs"));
        assert!(!eng.includes("deps/Cargo.lock"));
        assert!(!eng.includes("gen/api/types.py"));
    }

    #[test]
    fn allow_mode_requires_a_match() {
        let (eng, _) = engine("{mode: allow, allow: ['src/**', '*.md']}");
        assert!(eng.includes("src/a/b.py"));
        assert!(eng.includes("README.md"));
        assert!(!eng.includes("tests/a.py"));
        assert!(!eng.includes("docs/x.md")); // '*' does not cross '/'
    }

    #[test]
    fn child_node_overrides_parent_decision() {
        let (eng, _) = engine(
            "{mode: allow, allow: ['**/*.py'], children: {vendor: {mode: allow, allow: []}}}",
        );
        assert!(eng.includes("app/x.py"));
        assert!(!eng.includes("vendor/x.py"));
    }

    #[test]
    fn empty_allow_list_warns_and_denies() {
        let (eng, diags) = engine("{mode: allow, allow: []}");
        assert!(!eng.includes("anything.py"));
        assert_eq!(diags.warnings.len(), 1);
        assert!(diags.warnings[0].contains("empty allow list"));
    }

    #[test]
    fn may_descend_is_consistent_with_includes() {
        let (eng, _) = engine(
            "{mode: allow, allow: ['src/**/*.py'], children: {docs: {mode: block, block: ['drafts/**']}}}",
        );
        assert!(eng.may_descend("src"));
        assert!(eng.may_descend("src/deep/deeper"));
        assert!(eng.may_descend("docs"));
        assert!(!eng.may_descend("tests"));
        // Invariant: pruned dir ⇒ no file under it is included.
        assert!(!eng.includes("tests/unit/a.py"));
    }

    #[test]
    fn may_descend_with_component_prefix_pattern() {
        let (eng, _) = engine("{mode: allow, allow: ['apps/*/src/*.ts']}");
        assert!(eng.may_descend("apps"));
        assert!(eng.may_descend("apps/web"));
        assert!(eng.may_descend("apps/web/src"));
        assert!(!eng.may_descend("libs"));
    }

    #[test]
    fn block_patterns_prune_directories() {
        let (eng, _) = engine("{mode: block, block: ['node_modules', 'node_modules/**']}");
        assert!(!eng.may_descend("node_modules"));
        assert!(eng.may_descend("src"));
    }
}
