mod common;

use common::{repo_with_sections, write};
use listgen::engine::{run_render, run_report, RunOptions};
use listgen::manifest::RunMode;

fn opts() -> RunOptions {
    RunOptions {
        // The heuristic counter keeps fixtures independent of BPE tables.
        model: "fixture-model".to_string(),
        ..RunOptions::default()
    }
}

#[test]
fn section_target_renders_fenced_listing() {
    let repo = repo_with_sections(
        "core:\n  extensions: ['.py']\n  filters: {mode: allow, allow: ['src/**']}\n",
    );
    write(repo.path(), "src/a.py", "x = 1\n");
    write(repo.path(), "src/b.py", "y = 2\n");
    write(repo.path(), "elsewhere/c.py", "z = 3\n");

    let text = run_render(repo.path(), "sec:core", &opts()).unwrap();
    assert!(text.starts_with("```python\n"));
    assert!(text.contains("# —— FILE: src/a.py ——\n"));
    assert!(text.contains("# —— FILE: src/b.py ——\n"));
    assert!(!text.contains("c.py"));
    assert!(text.ends_with("\n"));
}

#[test]
fn two_runs_are_byte_identical() {
    let repo = repo_with_sections(
        "core:\n  extensions: ['.py', '.md']\n  python:\n    function_bodies: {policy: strip_all}\n    literals: {max_tokens: 12}\n",
    );
    write(
        repo.path(),
        "src/app.py",
        "def run():\n    \"\"\"Run it.\"\"\"\n    data = [\"aaaaaaaaaa\", \"bbbbbbbbbb\", \"cccccccccc\", \"dddddddddd\"]\n    return data\n",
    );
    write(repo.path(), "README.md", "# App\n## Usage\n");

    let first = run_render(repo.path(), "sec:core", &opts()).unwrap();
    let second = run_render(repo.path(), "sec:core", &opts()).unwrap();
    assert_eq!(first, second);

    // Third run with a cold cache agrees too.
    let fresh = run_render(
        repo.path(),
        "sec:core",
        &RunOptions {
            fresh: true,
            ..opts()
        },
    )
    .unwrap();
    assert_eq!(first, fresh);
}

#[test]
fn changes_mode_only_lists_changed_files() {
    let repo = repo_with_sections("core:\n  extensions: ['.py']\n");
    write(repo.path(), "a.py", "x = 1\n");
    write(repo.path(), "b.py", "y = 2\n");

    // No VCS in the fixture → the changed set is empty → nothing listed.
    let text = run_render(
        repo.path(),
        "sec:core",
        &RunOptions {
            mode: RunMode::Changes,
            ..opts()
        },
    )
    .unwrap();
    assert!(text.is_empty());
}

#[test]
fn report_carries_stats_and_rendered_text() {
    let repo = repo_with_sections("core:\n  extensions: ['.py']\n");
    write(repo.path(), "a.py", "value = 12345\n");

    let report = run_report(repo.path(), "core", &opts()).unwrap();
    assert_eq!(report.scope, "section");
    assert_eq!(report.context.template_name, "sec:core");
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].path, "a.py");
    assert!(report.files[0].tokens_raw > 0);
    assert!(report.total.rendered_tokens > 0);
    assert!(report.rendered_text.contains("value = 12345"));
    assert_eq!(report.context.sections_used.get("core"), Some(&1usize));
}

#[test]
fn gitignored_files_stay_out() {
    let repo = repo_with_sections("core:\n  extensions: ['.py']\n");
    write(repo.path(), ".gitignore", "generated/\n");
    write(repo.path(), "main.py", "x = 1\n");
    write(repo.path(), "generated/out.py", "y = 2\n");

    let text = run_render(repo.path(), "sec:core", &opts()).unwrap();
    assert!(text.contains("main.py"));
    assert!(!text.contains("generated"));
}

#[test]
fn no_fence_override_wins_over_section_config() {
    let repo = repo_with_sections("core:\n  extensions: ['.py']\n  code_fence: true\n");
    write(repo.path(), "a.py", "x = 1\n");

    let text = run_render(
        repo.path(),
        "sec:core",
        &RunOptions {
            code_fence: Some(false),
            ..opts()
        },
    )
    .unwrap();
    assert!(!text.contains("```"));
    assert!(text.contains("# —— FILE: a.py ——\n"));
}

#[test]
fn unknown_target_is_an_error() {
    let repo = repo_with_sections("core:\n  extensions: ['.py']\n");
    assert!(run_render(repo.path(), "nope", &opts()).is_err());
}

#[test]
fn adapter_parse_failure_falls_back_to_raw_text() {
    let repo = repo_with_sections(
        "core:\n  extensions: ['.py']\n  python:\n    literals: {max_tokens: 10}\n",
    );
    // Severely broken syntax still renders: tree-sitter is error-tolerant
    // and the worst case degrades to the raw bytes.
    write(repo.path(), "broken.py", "def (((\n");

    let report = run_report(repo.path(), "sec:core", &opts()).unwrap();
    assert!(report.rendered_text.contains("def ((("));
}
