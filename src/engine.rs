use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde_json::json;

use crate::adapter::{self, ProcessRequest};
use crate::cache::Cache;
use crate::config::{Config, SectionCfg, CFG_DIR};
use crate::errors::{Diagnostics, PipelineError, Result};
use crate::manifest::{self, FileRef, RunMode, SectionBinding};
use crate::render::{self, Plan, ProcessedBlob};
use crate::stats::{self, DiagnosticsOut, RunResult, FORMAT_VERSION, PROTOCOL};
use crate::template::{SectionHandler, SectionRequest, TemplateEngine};
use crate::tokenizer::TokenService;
use crate::vcs;

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    pub model: String,
    /// CLI override; `None` keeps each section's configured fence setting.
    pub code_fence: Option<bool>,
    /// Bypass cache reads (entries are still refreshed).
    pub fresh: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::All,
            model: "o3".to_string(),
            code_fence: None,
            fresh: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetKind {
    Context,
    Section,
}

/// `ctx:NAME` | `sec:NAME` | bare name (context wins when both exist).
fn resolve_target(config: &Config, target: &str) -> Result<(TargetKind, String)> {
    let target = target.trim();
    if let Some(name) = target.strip_prefix("ctx:") {
        if !config.list_contexts().contains(&name.to_string()) {
            return Err(PipelineError::Template(format!("context not found: {name}")));
        }
        return Ok((TargetKind::Context, name.to_string()));
    }
    if let Some(name) = target.strip_prefix("sec:") {
        if config.find_section(name, "").is_none() {
            return Err(PipelineError::Config(format!("section not found: {name}")));
        }
        return Ok((TargetKind::Section, name.to_string()));
    }

    if config.list_contexts().contains(&target.to_string()) {
        return Ok((TargetKind::Context, target.to_string()));
    }
    if config.find_section(target, "").is_some() {
        return Ok((TargetKind::Section, target.to_string()));
    }
    Err(PipelineError::Template(format!(
        "no context or section named `{target}`"
    )))
}

pub fn run_report(root: &Path, target: &str, options: &RunOptions) -> Result<RunResult> {
    run(root, target, options)
}

pub fn run_render(root: &Path, target: &str, options: &RunOptions) -> Result<String> {
    run(root, target, options).map(|r| r.rendered_text)
}

fn run(root: &Path, target: &str, options: &RunOptions) -> Result<RunResult> {
    let mut diags = Diagnostics::default();

    let cfg_root = root.join(CFG_DIR);
    let config = Config::load(&cfg_root)?;

    let (tok, tok_warning) =
        TokenService::for_model(&options.model, config.global.chars_per_token);
    if let Some(w) = tok_warning {
        diags.warn(w);
    }
    let cache = Cache::new(root, config.global.cache_enabled, options.fresh, TOOL_VERSION);
    let vcs = vcs::detect(root);

    let (kind, name) = resolve_target(&config, target)?;

    // ---- Phase 1: scan the template graph for section usage ----
    let mut usage: BTreeMap<String, usize> = BTreeMap::new();
    let mut requests: BTreeMap<String, SectionRequest> = BTreeMap::new();

    match kind {
        TargetKind::Context => {
            let handler: SectionHandler = Box::new(|req| {
                *usage.entry(req.qualified_id.clone()).or_insert(0) += 1;
                requests
                    .entry(req.qualified_id.clone())
                    .or_insert_with(|| req.clone());
                Ok(String::new())
            });
            let mut engine = TemplateEngine::new(root, handler);
            engine.expand_context(&name)?;
        }
        TargetKind::Section => {
            let section = config
                .find_section(&name, "")
                .expect("checked by resolve_target");
            let id = section.canonical_id.clone();
            usage.insert(id.clone(), 1);
            requests.insert(
                id.clone(),
                SectionRequest {
                    qualified_id: id.clone(),
                    canonical_id: id,
                    scope_rel: String::new(),
                    scope_dir: root.to_path_buf(),
                    cfg_root: cfg_root.clone(),
                },
            );
        }
    }

    // ---- Phase 2: bindings + manifest ----
    let mut scope_configs: HashMap<PathBuf, Config> = HashMap::new();
    scope_configs.insert(cfg_root.clone(), config.clone());

    let mut bindings: Vec<SectionBinding> = Vec::new();
    for (qualified_id, count) in &usage {
        let req = &requests[qualified_id];
        if !scope_configs.contains_key(&req.cfg_root) {
            let loaded = Config::load(&req.cfg_root)?;
            scope_configs.insert(req.cfg_root.clone(), loaded);
        }
        let scope_config = &scope_configs[&req.cfg_root];
        let Some(section) = scope_config.section(&req.canonical_id) else {
            diags.warn(format!("unknown section `{qualified_id}` after scan"));
            continue;
        };
        bindings.push(SectionBinding {
            qualified_id: qualified_id.clone(),
            scope_dir: req.scope_dir.clone(),
            scope_rel: req.scope_rel.clone(),
            section: section.clone(),
            multiplicity: *count,
        });
    }

    let manifest = manifest::build_manifest(root, &bindings, options.mode, vcs.as_ref(), &mut diags);

    // ---- Phase 3: per-section plans, parallel adapter processing ----
    let section_cfg_by_id: BTreeMap<&str, &SectionCfg> = bindings
        .iter()
        .map(|b| (b.qualified_id.as_str(), &b.section.cfg))
        .collect();

    let mut files_by_section: BTreeMap<&str, Vec<&FileRef>> = BTreeMap::new();
    for file in &manifest.files {
        files_by_section
            .entry(file.section.as_str())
            .or_default()
            .push(file);
    }

    struct Job {
        file: FileRef,
        section_cfg: SectionCfg,
        group_size: usize,
        mixed: bool,
    }

    let mut plans: BTreeMap<String, Plan> = BTreeMap::new();
    let mut jobs: Vec<Job> = Vec::new();
    for (section_id, files) in &files_by_section {
        let section_cfg: &SectionCfg = section_cfg_by_id
            .get(*section_id)
            .copied()
            .expect("every manifest section has a binding");
        let code_fence = options.code_fence.unwrap_or(section_cfg.code_fence);
        let owned: Vec<FileRef> = files.iter().map(|f| (*f).clone()).collect();
        let plan = render::build_plan(&owned, code_fence);

        for group in &plan.groups {
            for entry in &group.entries {
                jobs.push(Job {
                    file: entry.clone(),
                    section_cfg: section_cfg.clone(),
                    group_size: group.entries.len(),
                    mixed: group.mixed,
                });
            }
        }
        plans.insert((*section_id).to_string(), plan);
    }

    let results: Vec<(ProcessedBlob, Vec<String>)> = jobs
        .par_iter()
        .map(|job| process_job(job.file.clone(), &job.section_cfg, job.group_size, job.mixed, &tok, &cache))
        .collect();

    let mut blobs: Vec<ProcessedBlob> = Vec::with_capacity(results.len());
    for (blob, warnings) in results {
        for w in warnings {
            diags.warn(w);
        }
        blobs.push(blob);
    }

    // ---- Phase 4: render section blocks ----
    let mut section_texts: BTreeMap<String, String> = BTreeMap::new();
    for (section_id, plan) in &plans {
        let rels: Vec<String> = files_by_section[section_id.as_str()]
            .iter()
            .map(|f| f.rel_path.clone())
            .collect();
        let labels = render::build_labels(&rels, config.global.path_labels);
        let section_blobs: Vec<ProcessedBlob> = blobs
            .iter()
            .filter(|b| rels.contains(&b.rel_path))
            .cloned()
            .collect();
        let doc = render::render_document(plan, &section_blobs, &labels);
        section_texts.insert(section_id.clone(), doc.text);
    }
    // Sections that matched no files (changes mode, empty dirs) still have
    // a placeholder to satisfy: they render as nothing.
    for id in usage.keys() {
        section_texts.entry(id.clone()).or_default();
    }

    // ---- Phase 5: final document ----
    let (rendered_text, md_meta) = match kind {
        TargetKind::Context => {
            let text;
            let md_meta;
            {
                let handler: SectionHandler = Box::new(|req| {
                    section_texts
                        .get(&req.qualified_id)
                        .map(|t| t.trim_end_matches('\n').to_string())
                        .ok_or_else(|| {
                            PipelineError::Template(format!(
                                "section `{}` vanished between scan and render",
                                req.qualified_id
                            ))
                        })
                });
                let mut engine = TemplateEngine::new(root, handler);
                text = engine.expand_context(&name)?;
                md_meta = engine.md_meta.clone();
            }
            (ensure_trailing_newline(text), md_meta)
        }
        TargetKind::Section => {
            let id = usage.keys().next().expect("one section");
            (
                ensure_trailing_newline(section_texts.get(id).cloned().unwrap_or_default()),
                crate::optimize::Metrics::default(),
            )
        }
    };

    let sections_only_text = {
        let mut parts: Vec<&str> = Vec::new();
        for id in usage.keys() {
            if let Some(text) = section_texts.get(id) {
                parts.push(text.trim_end_matches('\n'));
            }
        }
        let mut joined = parts.join("\n\n");
        if !joined.is_empty() {
            joined.push('\n');
        }
        joined
    };

    // ---- Phase 6: statistics ----
    let (files, mut totals, mut context) = stats::compute_stats(
        &blobs,
        &manifest,
        &rendered_text,
        &sections_only_text,
        &tok,
        &cache,
    );

    context.template_name = match kind {
        TargetKind::Context => format!("ctx:{name}"),
        TargetKind::Section => format!("sec:{name}"),
    };
    context.sections_used = usage.clone();
    for (k, v) in md_meta.iter() {
        *totals.meta_summary.entry(k.clone()).or_insert(0) += *v;
    }

    // Rendered-token cache entry, keyed by the processed keys it composed.
    let processed_keys: BTreeMap<String, String> = blobs
        .iter()
        .map(|b| (b.rel_path.clone(), b.cache_key_processed.clone()))
        .collect();
    let options_fp = json!({
        "mode": options.mode,
        "code_fence": options.code_fence,
        "model": options.model,
    });
    let (_, rendered_key_path) =
        cache.build_rendered_key(&context.template_name, &usage, &options_fp, &processed_keys);
    cache.update_rendered_tokens(&rendered_key_path, &tok.model, totals.rendered_tokens);

    Ok(RunResult {
        format_version: FORMAT_VERSION,
        scope: match kind {
            TargetKind::Context => "context".to_string(),
            TargetKind::Section => "section".to_string(),
        },
        model: tok.model.clone(),
        encoder: tok.encoder_name.clone(),
        ctx_limit: tok.ctx_limit,
        total: totals,
        files,
        context,
        rendered_text,
        diagnostics: DiagnosticsOut {
            protocol: PROTOCOL,
            tool_version: TOOL_VERSION.to_string(),
            root: root.to_string_lossy().to_string(),
            warnings: diags.warnings,
        },
    })
}

fn ensure_trailing_newline(mut text: String) -> String {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// Process one file through its adapter, cache-backed. Adapter failures
/// degrade to raw text with a warning; they never abort the run.
fn process_job(
    file: FileRef,
    section_cfg: &SectionCfg,
    group_size: usize,
    mixed: bool,
    tok: &TokenService,
    cache: &Cache,
) -> (ProcessedBlob, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    let raw_bytes = std::fs::read(&file.abs_path).unwrap_or_default();
    let raw_text = String::from_utf8_lossy(&raw_bytes).into_owned();
    let size_bytes = raw_bytes.len() as u64;

    let handler = adapter::adapter_for_path(&file.rel_path);
    let cfg_fp = handler.cfg_fingerprint(section_cfg);
    let (key_processed, processed_path) =
        cache.build_processed_key(&file.abs_path, handler.name(), &cfg_fp, group_size, mixed);
    let (key_raw, _) = cache.build_raw_tokens_key(&file.abs_path);

    if let Some((processed_text, meta)) = cache.get_processed(&processed_path) {
        return (
            ProcessedBlob {
                rel_path: file.rel_path,
                size_bytes,
                raw_text,
                processed_text,
                meta: crate::optimize::Metrics::from_json(&meta),
                cache_key_processed: key_processed,
                cache_key_raw: key_raw,
            },
            warnings,
        );
    }

    let request = ProcessRequest {
        rel_path: &file.rel_path,
        raw_text: &raw_text,
        section_cfg,
        group_size,
        mixed,
        tokenizer: tok,
    };

    let outcome = match handler.process(&request) {
        Ok(outcome) => outcome,
        Err(e) => {
            warnings.push(format!("adapter fallback for `{}`: {e}", file.rel_path));
            adapter::ProcessOutcome {
                processed_text: raw_text.clone(),
                metrics: crate::optimize::Metrics::default(),
            }
        }
    };

    cache.put_processed(&processed_path, &outcome.processed_text, &outcome.metrics.to_json());

    (
        ProcessedBlob {
            rel_path: file.rel_path,
            size_bytes,
            raw_text,
            processed_text: outcome.processed_text,
            meta: outcome.metrics,
            cache_key_processed: key_processed,
            cache_key_raw: key_raw,
        },
        warnings,
    )
}
