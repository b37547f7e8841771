mod common;

use common::{repo_with_sections, write};
use listgen::engine::{run_render, RunOptions};

fn opts() -> RunOptions {
    RunOptions {
        model: "fixture-model".to_string(),
        ..RunOptions::default()
    }
}

fn repo(max_tokens: usize) -> tempfile::TempDir {
    repo_with_sections(&format!(
        "core:\n  extensions: ['.py']\n  code_fence: false\n  python:\n    literals: {{max_tokens: {max_tokens}}}\n"
    ))
}

#[test]
fn dict_dfs_keeps_head_and_reports_removals() {
    let repo = repo(20);
    write(
        repo.path(),
        "data.py",
        r#"BIG_DICT = {
    "users": [1, 2, 3],
    "settings": {"feature_flags": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "limits": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", "retention": "cccccccccccccccccccccccccccccccccccccccc"}
}
"#,
    );

    let text = run_render(repo.path(), "sec:core", &opts()).unwrap();

    // The first entry survives whole, on one line.
    assert!(text.contains("\"users\": [1, 2, 3],"));
    // The second is gone, summarized as a middle comment with the counts.
    assert!(!text.contains("feature_flags"));
    assert!(text.contains("# … (1 more, −"));
    assert!(text.contains(" tokens)"));
    // The literal still closes.
    assert!(text.contains("\n}"));
}

#[test]
fn long_string_gets_inline_ellipsis_and_comment() {
    let repo = repo(30);
    let long = "This module demonstrates extremely verbose documentation content. ".repeat(8);
    write(
        repo.path(),
        "doc.py",
        &format!("MODULE_DOC = \"\"\"{long}\"\"\"\n"),
    );

    let text = run_render(repo.path(), "sec:core", &opts()).unwrap();

    // Opening delimiter intact, truncated content, ellipsis before closing.
    assert!(text.contains("MODULE_DOC = \"\"\"This module"));
    assert!(text.contains("…\"\"\""));
    // Trailing comment names the category and the savings.
    assert!(text.contains("# literal string (−"));
    // Most of the content is actually gone.
    assert!(text.len() < long.len());
}

#[test]
fn fstring_interpolation_is_never_split() {
    let repo = repo(6);
    let filler = "x".repeat(18);
    write(
        repo.path(),
        "fmt.py",
        &format!("MSG = f\"{filler}{{user_name_value}}tail-tail-tail-tail\"\n"),
    );

    let text = run_render(repo.path(), "sec:core", &opts()).unwrap();

    // The cut lands before the interpolation, never inside it.
    assert!(!text.contains("{user_name"), "split interpolation: {text}");
    let brace_pairs = text.matches('{').count() == text.matches('}').count();
    assert!(brace_pairs);
}

#[test]
fn literals_within_budget_are_untouched() {
    let repo = repo(50);
    let source = "SMALL = [1, 2, 3]\nNAME = \"short\"\n";
    write(repo.path(), "small.py", source);

    let text = run_render(repo.path(), "sec:core", &opts()).unwrap();
    assert!(text.contains("SMALL = [1, 2, 3]"));
    assert!(text.contains("NAME = \"short\""));
    assert!(!text.contains("…"));
}

#[test]
fn list_trim_appends_end_placeholder() {
    let repo = repo(12);
    write(
        repo.path(),
        "seq.py",
        "ITEMS = [\"aaaaaaaaaaaa\", \"bbbbbbbbbbbb\", \"cccccccccccc\", \"dddddddddddd\", \"eeeeeeeeeeee\"]\n",
    );

    let text = run_render(repo.path(), "sec:core", &opts()).unwrap();
    // END placeholder becomes the last element.
    assert!(text.contains("\"…\"]"));
    assert!(text.contains("# literal list (−"));
    assert!(!text.contains("eeeeeeeeeeee"));
}

#[test]
fn docstrings_are_not_trimmed_as_strings() {
    let repo = repo(8);
    let long_doc = "word ".repeat(60);
    write(
        repo.path(),
        "mod.py",
        &format!("\"\"\"{long_doc}\"\"\"\nX = 1\n"),
    );

    let text = run_render(repo.path(), "sec:core", &opts()).unwrap();
    // Module docstring is comment policy territory, not literal budget.
    assert!(!text.contains("# literal string"));
    assert!(text.contains("X = 1"));
}
