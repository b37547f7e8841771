use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::Cache;
use crate::manifest::Manifest;
use crate::render::ProcessedBlob;
use crate::tokenizer::TokenService;

pub const FORMAT_VERSION: u32 = 4;
pub const PROTOCOL: u32 = 1;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRow {
    pub path: String,
    pub size_bytes: u64,
    pub tokens_raw: usize,
    pub tokens_processed: usize,
    pub saved_tokens: usize,
    pub saved_pct: f64,
    pub prompt_share: f64,
    pub ctx_share: f64,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub size_bytes: u64,
    pub tokens_raw: usize,
    pub tokens_processed: usize,
    pub saved_tokens: usize,
    pub saved_pct: f64,
    pub ctx_share: f64,
    pub rendered_tokens: usize,
    pub rendered_overhead_tokens: usize,
    pub meta_summary: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    pub template_name: String,
    pub sections_used: BTreeMap<String, usize>,
    pub final_rendered_tokens: usize,
    pub template_only_tokens: usize,
    pub template_overhead_pct: f64,
    pub final_ctx_share: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DiagnosticsOut {
    pub protocol: u32,
    pub tool_version: String,
    pub root: String,
    pub warnings: Vec<String>,
}

/// The `report` command's JSON payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub format_version: u32,
    pub scope: String,
    pub model: String,
    pub encoder: String,
    pub ctx_limit: usize,
    pub total: Totals,
    pub files: Vec<FileRow>,
    pub context: ContextStats,
    #[serde(rename = "rendered_text")]
    pub rendered_text: String,
    pub diagnostics: DiagnosticsOut,
}

/// Token accounting over processed blobs and the final document.
///
/// Counts are cache-backed per `(file fingerprint, model)`; multiplicities
/// from the manifest weigh each file. `template_only` is the glue the
/// template added on top of a sections-only rendition.
pub fn compute_stats(
    blobs: &[ProcessedBlob],
    manifest: &Manifest,
    rendered_text: &str,
    sections_only_text: &str,
    tok: &TokenService,
    cache: &Cache,
) -> (Vec<FileRow>, Totals, ContextStats) {
    let mult_by_rel: BTreeMap<&str, usize> = manifest
        .files
        .iter()
        .map(|f| (f.rel_path.as_str(), f.multiplicity))
        .collect();

    // First blob per rel_path wins; multiplicity weighs counts, not copies.
    let mut dedup: BTreeMap<&str, &ProcessedBlob> = BTreeMap::new();
    for blob in blobs {
        dedup.entry(blob.rel_path.as_str()).or_insert(blob);
    }

    let mut total_raw = 0usize;
    let mut total_processed = 0usize;
    let mut total_size = 0u64;
    let mut meta_summary: BTreeMap<String, i64> = BTreeMap::new();
    let mut pre_rows: Vec<(&ProcessedBlob, usize, usize, usize)> = Vec::new();

    for (rel, blob) in &dedup {
        let mult = mult_by_rel.get(rel).copied().unwrap_or(1).max(1);

        let processed_path = cache.path_for_processed_key(&blob.cache_key_processed);
        let t_processed = match cache.get_tokens(&processed_path, &tok.model, "processed") {
            Some(n) => n,
            None => {
                let n = tok.count(&blob.processed_text);
                cache.update_tokens(&processed_path, &tok.model, "processed", n);
                n
            }
        };

        let raw_path = cache.path_for_raw_tokens_key(&blob.cache_key_raw);
        let t_raw = match cache.get_tokens(&raw_path, &tok.model, "raw") {
            Some(n) => n,
            None => {
                let n = tok.count(&blob.raw_text);
                cache.update_tokens(&raw_path, &tok.model, "raw", n);
                n
            }
        };

        total_processed += t_processed * mult;
        total_raw += t_raw * mult;
        total_size += blob.size_bytes;
        for (k, v) in blob.meta.iter() {
            *meta_summary.entry(k.clone()).or_insert(0) += *v;
        }

        pre_rows.push((*blob, t_raw, t_processed, mult));
    }

    let ctx_limit = tok.ctx_limit.max(1);
    let files: Vec<FileRow> = pre_rows
        .into_iter()
        .map(|(blob, t_raw, t_processed, mult)| {
            let raw_w = t_raw * mult;
            let processed_w = t_processed * mult;
            FileRow {
                path: blob.rel_path.clone(),
                size_bytes: blob.size_bytes,
                tokens_raw: raw_w,
                tokens_processed: processed_w,
                saved_tokens: raw_w.saturating_sub(processed_w),
                saved_pct: if raw_w > 0 {
                    (1.0 - processed_w as f64 / raw_w as f64) * 100.0
                } else {
                    0.0
                },
                prompt_share: if total_processed > 0 {
                    processed_w as f64 / total_processed as f64 * 100.0
                } else {
                    0.0
                },
                ctx_share: processed_w as f64 / ctx_limit as f64 * 100.0,
                meta: blob.meta.to_json(),
            }
        })
        .collect();

    let rendered_tokens = tok.count(rendered_text);
    let sections_only_tokens = tok.count(sections_only_text);
    let template_only = rendered_tokens.saturating_sub(sections_only_tokens);

    let totals = Totals {
        size_bytes: total_size,
        tokens_raw: total_raw,
        tokens_processed: total_processed,
        saved_tokens: total_raw.saturating_sub(total_processed),
        saved_pct: if total_raw > 0 {
            (1.0 - total_processed as f64 / total_raw as f64) * 100.0
        } else {
            0.0
        },
        ctx_share: total_processed as f64 / ctx_limit as f64 * 100.0,
        rendered_tokens,
        rendered_overhead_tokens: template_only,
        meta_summary,
    };

    let context = ContextStats {
        template_name: String::new(),
        sections_used: BTreeMap::new(),
        final_rendered_tokens: rendered_tokens,
        template_only_tokens: template_only,
        template_overhead_pct: if rendered_tokens > 0 {
            template_only as f64 / rendered_tokens as f64 * 100.0
        } else {
            0.0
        },
        final_ctx_share: rendered_tokens as f64 / ctx_limit as f64 * 100.0,
    };

    (files, totals, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FileRef;
    use crate::optimize::Metrics;

    fn blob(rel: &str, raw: &str, processed: &str) -> ProcessedBlob {
        ProcessedBlob {
            rel_path: rel.to_string(),
            size_bytes: raw.len() as u64,
            raw_text: raw.to_string(),
            processed_text: processed.to_string(),
            meta: {
                let mut m = Metrics::default();
                m.bump("literal_trimmed");
                m
            },
            cache_key_processed: "0".repeat(40),
            cache_key_raw: "1".repeat(40),
        }
    }

    fn manifest(rel: &str, mult: usize) -> Manifest {
        Manifest {
            files: vec![FileRef {
                abs_path: std::path::PathBuf::from(rel),
                rel_path: rel.to_string(),
                section: "core".to_string(),
                multiplicity: mult,
                language_hint: "python".to_string(),
            }],
        }
    }

    #[test]
    fn multiplicity_weighs_counts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::disabled(dir.path());
        let tok = TokenService::heuristic("test", 4, 32_000);

        let blobs = vec![blob("a.py", "aaaaaaaa", "aaaa")];
        let (files, totals, _) =
            compute_stats(&blobs, &manifest("a.py", 3), "aaaa", "aaaa", &tok, &cache);

        assert_eq!(files[0].tokens_raw, 6); // 2 tokens * 3
        assert_eq!(files[0].tokens_processed, 3);
        assert_eq!(totals.saved_tokens, 3);
        assert_eq!(totals.meta_summary.get("literal_trimmed"), Some(&1));
    }

    #[test]
    fn template_overhead_is_rendered_minus_sections() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::disabled(dir.path());
        let tok = TokenService::heuristic("test", 4, 32_000);

        let blobs = vec![blob("a.py", "aaaa", "aaaa")];
        let rendered = "x".repeat(40); // 10 tokens
        let sections = "x".repeat(24); // 6 tokens
        let (_, totals, ctx) = compute_stats(
            &blobs,
            &manifest("a.py", 1),
            &rendered,
            &sections,
            &tok,
            &cache,
        );
        assert_eq!(totals.rendered_tokens, 10);
        assert_eq!(ctx.template_only_tokens, 4);
        assert!(ctx.template_overhead_pct > 0.0);
    }
}
