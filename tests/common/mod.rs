use std::path::Path;

/// Write a file, creating parent directories.
pub fn write(root: &Path, rel: &str, text: &str) {
    let p = root.join(rel);
    std::fs::create_dir_all(p.parent().unwrap()).unwrap();
    std::fs::write(p, text).unwrap();
}

/// A repo with a root `lg-cfg/` holding the given sections.yaml.
pub fn repo_with_sections(sections_yaml: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "lg-cfg/sections.yaml", sections_yaml);
    // Keep tests hermetic: never pick up a stale cache kill-switch.
    std::env::remove_var("LISTGEN_CACHE");
    dir
}
