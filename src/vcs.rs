use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

/// Supplies the changed-file set for `--mode changes`.
pub trait Vcs: Send + Sync {
    fn changed_files(&self, root: &Path) -> BTreeSet<String>;
}

/// Union of unstaged, staged and untracked paths, POSIX-relative.
pub struct GitVcs;

fn git_lines(root: &Path, args: &[&str]) -> Vec<String> {
    let out = Command::new("git").arg("-C").arg(root).args(args).output();
    match out {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

impl Vcs for GitVcs {
    fn changed_files(&self, root: &Path) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        set.extend(git_lines(root, &["diff", "--name-only"]));
        set.extend(git_lines(root, &["diff", "--name-only", "--cached"]));
        set.extend(git_lines(
            root,
            &["ls-files", "--others", "--exclude-standard"],
        ));
        set.into_iter().map(|p| p.replace('\\', "/")).collect()
    }
}

/// Used outside git repositories; `--mode changes` then selects nothing.
pub struct NullVcs;

impl Vcs for NullVcs {
    fn changed_files(&self, _root: &Path) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// Pick the provider for a repository root.
pub fn detect(root: &Path) -> Box<dyn Vcs> {
    if root.join(".git").exists() {
        Box::new(GitVcs)
    } else {
        Box::new(NullVcs)
    }
}
