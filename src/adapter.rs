use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::json;

use crate::config::{CodeLangCfg, SectionCfg};
use crate::document::SourceDocument;
use crate::editor::EditBuffer;
use crate::elements;
use crate::errors::{PipelineError, Result};
use crate::langs::{self, LanguageSpec};
use crate::markdown;
use crate::optimize::{
    comments, function_bodies, group_placeholders, imports, literals, public_api, Metrics,
    Placeholder,
};
use crate::tokenizer::TokenService;

/// Placeholders merge across a gap of at most this many lines.
const PLACEHOLDER_GROUP_GAP: usize = 2;

pub struct ProcessRequest<'a> {
    pub rel_path: &'a str,
    pub raw_text: &'a str,
    pub section_cfg: &'a SectionCfg,
    pub group_size: usize,
    pub mixed: bool,
    pub tokenizer: &'a TokenService,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub processed_text: String,
    pub metrics: Metrics,
}

/// One language's file processor. Parse failure surfaces as
/// [`PipelineError::Adapter`]; the orchestrator records a warning and falls
/// back to raw text.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn process(&self, req: &ProcessRequest) -> Result<ProcessOutcome>;
    /// Stable config fingerprint for cache keys.
    fn cfg_fingerprint(&self, section_cfg: &SectionCfg) -> serde_json::Value;
}

// ------------------------- code adapter -------------------------

pub struct CodeAdapter {
    spec: &'static LanguageSpec,
}

impl CodeAdapter {
    pub fn new(spec: &'static LanguageSpec) -> Self {
        Self { spec }
    }

    fn lang_cfg<'a>(&self, section: &'a SectionCfg) -> &'a CodeLangCfg {
        match self.spec.name {
            "python" => &section.python,
            "rust" => &section.rust,
            _ => &section.typescript,
        }
    }

    /// Run the optimizer pipeline with an explicit per-language config
    /// (the budget controller re-enters here with escalated configs).
    pub fn process_with_cfg(&self, req: &ProcessRequest, cfg: &CodeLangCfg) -> Result<ProcessOutcome> {
        let ext = extension_of(req.rel_path);
        let language = (self.spec.language_for)(&ext);
        let doc = SourceDocument::parse(req.raw_text.to_string(), language, self.spec.queries)
            .map_err(|e| PipelineError::Adapter {
                path: req.rel_path.to_string(),
                message: e.to_string(),
            })?;

        let elements = elements::collect(&doc, self.spec.code)?;
        let mut editor = EditBuffer::new(req.raw_text);
        let mut metrics = Metrics::default();
        let mut placeholders: Vec<Placeholder> = Vec::new();
        let mut removed_spans: Vec<(usize, usize)> = Vec::new();

        if cfg.public_api {
            public_api::apply(&elements, &mut placeholders, &mut removed_spans, &mut metrics);
        }

        imports::apply(
            &doc,
            &cfg.imports,
            self.spec.is_local_import,
            &mut placeholders,
            &removed_spans,
            &mut metrics,
        )?;

        // Fixed pipeline order: comments run before function bodies, so a
        // comment inside a soon-to-be-stripped body is still processed and
        // counted; its edit is absorbed by the body placeholder later.
        let mut blocked: Vec<(usize, usize)> = removed_spans.clone();
        blocked.extend(placeholders.iter().map(|p| (p.start, p.end)));
        comments::apply(
            &doc,
            &elements,
            cfg.comments,
            self.spec.doc_comment_prefixes,
            &mut editor,
            &blocked,
            &mut metrics,
        )?;

        function_bodies::apply(
            &doc,
            &elements,
            &cfg.function_bodies,
            &mut placeholders,
            &removed_spans,
            &mut metrics,
        );

        let placeholders = drop_contained(placeholders);
        let mut blocked: Vec<(usize, usize)> = removed_spans.clone();
        blocked.extend(placeholders.iter().map(|p| (p.start, p.end)));

        if let Some(max_tokens) = cfg.literals.max_tokens {
            let handler = literals::LiteralHandler::new(
                self.spec.literals,
                req.tokenizer,
                self.spec.comment_single,
                self.spec.comment_block,
            );
            literals::apply(
                &doc,
                &mut editor,
                &mut metrics,
                &blocked,
                &handler,
                max_tokens,
                self.spec.is_docstring,
            )?;
        }

        let grouped = group_placeholders(placeholders, PLACEHOLDER_GROUP_GAP);
        'placeholders: for p in &grouped {
            let mut start = p.start;
            // Whole-line comment removals can lap a body boundary by their
            // trailing newline. A crosser from the left (a removed docstring
            // line) pushes the stub past it; a crosser to the right is
            // superseded by the stub and retired.
            for (es, ee) in editor.crossing_edits(start, p.end) {
                if es < start && ee >= p.end {
                    continue 'placeholders; // region already rewritten wholesale
                }
                if es < start {
                    start = start.max(ee.min(p.end));
                } else {
                    editor.retire_edit(es, ee);
                }
            }
            if start >= p.end {
                continue;
            }
            let stub = self.render_placeholder(&doc, p, start);
            editor.add_replacement_composing_nested(start, p.end, &stub, "placeholder");
        }

        Ok(ProcessOutcome {
            processed_text: editor.apply(),
            metrics,
        })
    }

    /// `start` is the (possibly crosser-adjusted) replacement start; the
    /// message still describes the placeholder's original extent.
    fn render_placeholder(&self, doc: &SourceDocument, p: &Placeholder, start: usize) -> String {
        let message = if p.kind.ends_with("_body") {
            format!("… {} omitted ({} lines)", p.noun, p.lines)
        } else if p.count == 1 {
            format!("… 1 {} omitted ({} lines)", p.noun, p.lines)
        } else {
            format!("… {} {} omitted ({} lines)", p.count, pluralize(&p.noun), p.lines)
        };

        if p.kind.ends_with("_body") && self.spec.body_stub_braces {
            return format!("{{ /* {message} */ }}");
        }

        let stub = format!("{} {message}", self.spec.comment_single);
        let line_start = doc.line_start(doc.line_number(start));
        let before = &doc.text()[line_start..start];
        if before.is_empty() {
            // Range begins at column 0: the line's indentation is inside the
            // replaced region, so re-emit it.
            format!("{}{stub}", doc.line_indent_at(start))
        } else if before.chars().all(char::is_whitespace) {
            stub
        } else {
            // Mid-line start (e.g. right after a kept docstring): the stub
            // needs its own line at the original indentation.
            let indent = doc.line_indent_at(start);
            format!("\n{indent}{stub}")
        }
    }
}

impl Adapter for CodeAdapter {
    fn name(&self) -> &'static str {
        self.spec.name
    }

    fn process(&self, req: &ProcessRequest) -> Result<ProcessOutcome> {
        let cfg = self.lang_cfg(req.section_cfg);
        match cfg.max_file_tokens {
            Some(budget) => crate::budget::process_with_budget(self, req, cfg, budget),
            None => self.process_with_cfg(req, cfg),
        }
    }

    fn cfg_fingerprint(&self, section_cfg: &SectionCfg) -> serde_json::Value {
        json!({
            "adapter": self.spec.name,
            "cfg": self.lang_cfg(section_cfg),
        })
    }
}

fn pluralize(noun: &str) -> String {
    if noun.ends_with('s') {
        format!("{noun}es")
    } else {
        format!("{noun}s")
    }
}

/// Drop placeholders fully contained in another (nested defs inside a
/// stripped outer body, members of a removed class).
fn drop_contained(mut placeholders: Vec<Placeholder>) -> Vec<Placeholder> {
    placeholders.sort_by_key(|p| (p.start, std::cmp::Reverse(p.end)));
    let mut out: Vec<Placeholder> = Vec::new();
    for p in placeholders {
        let contained = out.iter().any(|q| q.start <= p.start && p.end <= q.end);
        if !contained {
            out.push(p);
        }
    }
    out
}

// ------------------------- markdown / plain -------------------------

pub struct MarkdownAdapter;

impl Adapter for MarkdownAdapter {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn process(&self, req: &ProcessRequest) -> Result<ProcessOutcome> {
        let cfg = &req.section_cfg.markdown;
        let mut metrics = Metrics::default();

        let Some(max_level) = cfg.max_heading_level else {
            return Ok(ProcessOutcome {
                processed_text: req.raw_text.to_string(),
                metrics,
            });
        };
        if req.mixed {
            return Ok(ProcessOutcome {
                processed_text: req.raw_text.to_string(),
                metrics,
            });
        }

        let strip_h1 = req.group_size == 1;
        let (text, meta) = markdown::normalize_headings(req.raw_text, max_level, strip_h1);
        metrics.set("md.removed_h1", meta.removed_h1 as i64);
        metrics.set("md.shifted", meta.shifted as i64);
        Ok(ProcessOutcome {
            processed_text: text,
            metrics,
        })
    }

    fn cfg_fingerprint(&self, section_cfg: &SectionCfg) -> serde_json::Value {
        json!({
            "adapter": "markdown",
            "cfg": section_cfg.markdown,
        })
    }
}

pub struct PlainAdapter;

impl Adapter for PlainAdapter {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn process(&self, req: &ProcessRequest) -> Result<ProcessOutcome> {
        Ok(ProcessOutcome {
            processed_text: req.raw_text.to_string(),
            metrics: Metrics::default(),
        })
    }

    fn cfg_fingerprint(&self, _section_cfg: &SectionCfg) -> serde_json::Value {
        json!({ "adapter": "plain" })
    }
}

// ------------------------- registry -------------------------

struct Registry {
    adapters: Vec<Box<dyn Adapter>>,
    by_ext: HashMap<&'static str, usize>,
    markdown: usize,
    plain: usize,
}

fn registry() -> &'static Registry {
    static REG: OnceLock<Registry> = OnceLock::new();
    REG.get_or_init(|| {
        let mut adapters: Vec<Box<dyn Adapter>> = Vec::new();
        let mut by_ext: HashMap<&'static str, usize> = HashMap::new();

        for &spec in langs::all() {
            let idx = adapters.len();
            adapters.push(Box::new(CodeAdapter::new(spec)));
            for ext in spec.extensions {
                by_ext.insert(*ext, idx);
            }
        }

        let markdown = adapters.len();
        adapters.push(Box::new(MarkdownAdapter));
        by_ext.insert(".md", markdown);
        by_ext.insert(".markdown", markdown);

        let plain = adapters.len();
        adapters.push(Box::new(PlainAdapter));

        Registry {
            adapters,
            by_ext,
            markdown,
            plain,
        }
    })
}

/// Pick the adapter for a repo-relative path. Unknown extensions pass
/// through the plain adapter.
pub fn adapter_for_path(rel_path: &str) -> &'static dyn Adapter {
    let reg = registry();
    let ext = extension_of(rel_path);
    match reg.by_ext.get(ext.as_str()) {
        Some(&idx) => reg.adapters[idx].as_ref(),
        None => reg.adapters[reg.plain].as_ref(),
    }
}

pub fn markdown_adapter() -> &'static dyn Adapter {
    let reg = registry();
    reg.adapters[reg.markdown].as_ref()
}

fn extension_of(rel_path: &str) -> String {
    std::path::Path::new(rel_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}
