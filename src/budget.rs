use crate::adapter::{CodeAdapter, ProcessOutcome, ProcessRequest};
use crate::config::{BodyPolicy, CodeLangCfg, CommentPolicy};
use crate::errors::Result;

/// Per-file escalation ladder.
///
/// Each rung reprocesses the file with a more aggressive config and
/// re-tokenizes; the first result within budget wins, the last rung's
/// result is used when none fits. The rung order is fixed, so a given
/// (file, config, budget) always produces the same text.
pub fn process_with_budget(
    adapter: &CodeAdapter,
    req: &ProcessRequest,
    base_cfg: &CodeLangCfg,
    budget: usize,
) -> Result<ProcessOutcome> {
    let mut outcome: Option<ProcessOutcome> = None;

    for (rung, cfg) in ladder(base_cfg).into_iter().enumerate() {
        let candidate = adapter.process_with_cfg(req, &cfg)?;
        let tokens = req.tokenizer.count(&candidate.processed_text);
        let fits = tokens <= budget;

        let mut candidate = candidate;
        candidate.metrics.set("budget.rung", rung as i64);
        candidate.metrics.set("budget.tokens", tokens as i64);
        outcome = Some(candidate);

        if fits {
            break;
        }
    }

    Ok(outcome.expect("ladder is never empty"))
}

/// Escalation steps derived from the section's base config. Settings only
/// ever tighten; a rung never undoes what an earlier one enabled.
fn ladder(base: &CodeLangCfg) -> Vec<CodeLangCfg> {
    let mut rungs = Vec::with_capacity(5);
    rungs.push(base.clone());

    let mut c = base.clone();
    c.comments = match c.comments {
        CommentPolicy::StripAll => CommentPolicy::StripAll,
        _ => CommentPolicy::KeepFirstSentence,
    };
    c.imports.strip_local = true;
    rungs.push(c.clone());

    c.function_bodies.policy = BodyPolicy::StripAll;
    rungs.push(c.clone());

    c.literals.max_tokens = Some(c.literals.max_tokens.map_or(24, |t| t.min(24)));
    rungs.push(c.clone());

    c.public_api = true;
    c.comments = CommentPolicy::StripAll;
    c.literals.max_tokens = Some(12);
    rungs.push(c);

    rungs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::config::SectionCfg;
    use crate::tokenizer::TokenService;

    const SOURCE: &str = "\
# A chatty comment that costs tokens for no structural value at all.
def public_api():
    \"\"\"Keep me if possible.\"\"\"
    total = 0
    for i in range(100):
        total += i * i
    return total

def _internal_helper():
    values = [\"aaaaaaaa\", \"bbbbbbbb\", \"cccccccc\", \"dddddddd\", \"eeeeeeee\"]
    return values
";

    fn run(budget: usize) -> (ProcessOutcome, usize) {
        let tok = TokenService::heuristic("test", 4, 32_000);
        let mut section = SectionCfg::default();
        section.python.max_file_tokens = Some(budget);
        let req = ProcessRequest {
            rel_path: "m.py",
            raw_text: SOURCE,
            section_cfg: &section,
            group_size: 1,
            mixed: false,
            tokenizer: &tok,
        };
        let out = crate::adapter::adapter_for_path("m.py")
            .process(&req)
            .unwrap();
        let tokens = tok.count(&out.processed_text);
        (out, tokens)
    }

    #[test]
    fn generous_budget_stops_at_first_rung() {
        let (out, _) = run(10_000);
        assert_eq!(out.metrics.get("budget.rung"), 0);
        assert!(out.processed_text.contains("chatty comment"));
    }

    #[test]
    fn tight_budget_escalates() {
        let (out, tokens) = run(60);
        assert!(out.metrics.get("budget.rung") > 0);
        assert!(tokens <= 60 || out.metrics.get("budget.rung") == 4);
    }

    #[test]
    fn processed_size_grows_with_budget() {
        // Loosening the budget can only stop the ladder earlier, and earlier
        // rungs are strictly less aggressive.
        let mut prev = 0usize;
        for budget in [40, 80, 160, 1000] {
            let (_, tokens) = run(budget);
            assert!(tokens >= prev);
            prev = tokens;
        }
    }
}
