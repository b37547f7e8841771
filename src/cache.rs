use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use sha1::{Digest, Sha1};

use crate::debug_log;

pub const CACHE_VERSION: u32 = 1;
const CACHE_DIR: &str = ".lg-cache";

/// Content-addressed artifact store: processed texts, raw/processed token
/// counts, rendered-document token counts.
///
/// Keys are sha1 over a canonical JSON payload (sorted keys). All I/O is
/// best-effort: a broken cache degrades to uncached behavior, never to a
/// failed run. Writes go through a temp file and an atomic rename.
pub struct Cache {
    enabled: bool,
    /// Skip reads but still refresh entries.
    fresh: bool,
    tool_version: String,
    dir: PathBuf,
}

fn sha1_json(payload: &Value) -> String {
    // serde_json maps are BTree-backed, so serialization is key-sorted and
    // canonical by construction.
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha1::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

fn file_fingerprint(abs_path: &Path) -> Value {
    match std::fs::metadata(abs_path) {
        Ok(meta) => {
            let mtime_ns = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            json!({
                "path": abs_path.to_string_lossy(),
                "mtime_ns": mtime_ns,
                "size": meta.len(),
            })
        }
        Err(_) => json!({
            "path": abs_path.to_string_lossy(),
            "mtime_ns": 0,
            "size": 0,
        }),
    }
}

impl Cache {
    pub fn new(root: &Path, enabled: bool, fresh: bool, tool_version: &str) -> Self {
        let env_enabled = match std::env::var("LISTGEN_CACHE") {
            Ok(v) => !matches!(
                v.trim().to_lowercase().as_str(),
                "0" | "false" | "no" | "off" | ""
            ),
            Err(_) => enabled,
        };

        let dir = root.join(CACHE_DIR).join(format!("v{CACHE_VERSION}"));
        let mut cache = Self {
            enabled: env_enabled,
            fresh,
            tool_version: tool_version.to_string(),
            dir,
        };

        if cache.enabled {
            if let Err(e) = cache.ensure_layout(root) {
                debug_log!("cache disabled: {e}");
                cache.enabled = false;
            }
        }
        cache
    }

    pub fn disabled(root: &Path) -> Self {
        Self {
            enabled: false,
            fresh: false,
            tool_version: String::new(),
            dir: root.join(CACHE_DIR),
        }
    }

    fn ensure_layout(&self, root: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        // Keep the cache out of version control without user intervention.
        let gitignore = root.join(CACHE_DIR).join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(gitignore, "*\n")?;
        }
        Ok(())
    }

    // ------------------------- keys -------------------------

    pub fn build_processed_key(
        &self,
        abs_path: &Path,
        adapter_name: &str,
        adapter_cfg: &Value,
        group_size: usize,
        mixed: bool,
    ) -> (String, PathBuf) {
        let payload = json!({
            "v": CACHE_VERSION,
            "kind": "processed",
            "file": file_fingerprint(abs_path),
            "adapter": adapter_name,
            "cfg": adapter_cfg,
            "group_size": group_size,
            "mixed": mixed,
            "tool": self.tool_version,
        });
        let key = sha1_json(&payload);
        let path = self.bucket_path("processed", &key);
        (key, path)
    }

    /// Raw-token keys depend only on the file fingerprint; the adapter never
    /// touches the bytes being counted.
    pub fn build_raw_tokens_key(&self, abs_path: &Path) -> (String, PathBuf) {
        let payload = json!({
            "v": CACHE_VERSION,
            "kind": "raw-tokens",
            "file": file_fingerprint(abs_path),
            "tool": self.tool_version,
        });
        let key = sha1_json(&payload);
        let path = self.bucket_path("raw_tokens", &key);
        (key, path)
    }

    pub fn build_rendered_key(
        &self,
        context_name: &str,
        sections_used: &BTreeMap<String, usize>,
        options_fp: &Value,
        processed_keys: &BTreeMap<String, String>,
    ) -> (String, PathBuf) {
        let payload = json!({
            "v": CACHE_VERSION,
            "kind": "rendered",
            "context": context_name,
            "sections": sections_used,
            "options": options_fp,
            "processed": processed_keys,
            "tool": self.tool_version,
        });
        let key = sha1_json(&payload);
        let path = self.bucket_path("rendered", &key);
        (key, path)
    }

    pub fn path_for_processed_key(&self, key: &str) -> PathBuf {
        self.bucket_path("processed", key)
    }

    pub fn path_for_raw_tokens_key(&self, key: &str) -> PathBuf {
        self.bucket_path("raw_tokens", key)
    }

    fn bucket_path(&self, kind: &str, key: &str) -> PathBuf {
        self.dir
            .join(kind)
            .join(&key[0..2])
            .join(&key[2..4])
            .join(format!("{key}.json"))
    }

    // ------------------------- io -------------------------

    fn load(&self, path: &Path) -> Option<Value> {
        if !self.enabled || self.fresh {
            return None;
        }
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn load_for_update(&self, path: &Path) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn atomic_write(&self, path: &Path, data: &Value) {
        if !self.enabled {
            return;
        }
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, serde_json::to_vec(data)?)?;
            std::fs::rename(&tmp, path)?;
            Ok(())
        };
        if let Err(e) = write() {
            debug_log!("cache write failed for {}: {e}", path.display());
        }
    }

    // ------------------------- processed -------------------------

    pub fn get_processed(&self, path: &Path) -> Option<(String, Value)> {
        let data = self.load(path)?;
        let text = data.get("processed_text")?.as_str()?.to_string();
        let meta = data.get("meta").cloned().unwrap_or(Value::Null);
        Some((text, meta))
    }

    pub fn put_processed(&self, path: &Path, processed_text: &str, meta: &Value) {
        let now = iso8601_now();
        self.atomic_write(
            path,
            &json!({
                "v": CACHE_VERSION,
                "kind": "processed",
                "processed_text": processed_text,
                "tokens": {},
                "meta": meta,
                "created_at": now,
                "updated_at": now,
            }),
        );
    }

    // ------------------------- token counts -------------------------

    pub fn get_tokens(&self, path: &Path, model: &str, mode: &str) -> Option<usize> {
        let data = self.load(path)?;
        data.get("tokens")?
            .get(model)?
            .get(mode)?
            .as_u64()
            .map(|v| v as usize)
    }

    pub fn update_tokens(&self, path: &Path, model: &str, mode: &str, value: usize) {
        if !self.enabled {
            return;
        }
        let now = iso8601_now();
        let mut data = self.load_for_update(path).unwrap_or_else(|| {
            json!({
                "v": CACHE_VERSION,
                "kind": "tokens",
                "processed_text": "",
                "tokens": {},
                "meta": {},
                "created_at": now,
            })
        });
        data["tokens"][model][mode] = json!(value);
        data["updated_at"] = json!(now);
        self.atomic_write(path, &data);
    }

    pub fn get_rendered_tokens(&self, path: &Path, model: &str) -> Option<usize> {
        let data = self.load(path)?;
        data.get("tokens")?.get(model)?.as_u64().map(|v| v as usize)
    }

    pub fn update_rendered_tokens(&self, path: &Path, model: &str, value: usize) {
        if !self.enabled {
            return;
        }
        let now = iso8601_now();
        let mut data = self.load_for_update(path).unwrap_or_else(|| {
            json!({ "v": CACHE_VERSION, "kind": "rendered", "tokens": {}, "created_at": now })
        });
        data["tokens"][model] = json!(value);
        data["updated_at"] = json!(now);
        self.atomic_write(path, &data);
    }
}

/// ISO-8601 UTC timestamp without pulling in a date crate: days-from-epoch
/// to civil date via the standard Gregorian arithmetic.
fn iso8601_now() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let mth = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if mth <= 2 { y + 1 } else { y };

    format!("{y:04}-{mth:02}-{d:02}T{h:02}:{m:02}:{s:02}Z")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_in(dir: &Path) -> Cache {
        std::env::remove_var("LISTGEN_CACHE");
        Cache::new(dir, true, false, "0.6.0")
    }

    #[test]
    fn processed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let file = dir.path().join("a.py");
        std::fs::write(&file, "x = 1\n").unwrap();

        let (_, path) = cache.build_processed_key(&file, "python", &json!({"a": 1}), 1, false);
        assert!(cache.get_processed(&path).is_none());

        cache.put_processed(&path, "x = 1\n", &json!({"k": 2}));
        let (text, meta) = cache.get_processed(&path).unwrap();
        assert_eq!(text, "x = 1\n");
        assert_eq!(meta["k"], 2);
    }

    #[test]
    fn key_changes_with_file_and_cfg() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let file = dir.path().join("a.py");
        std::fs::write(&file, "x = 1\n").unwrap();

        let (k1, _) = cache.build_processed_key(&file, "python", &json!({"a": 1}), 1, false);
        let (k2, _) = cache.build_processed_key(&file, "python", &json!({"a": 2}), 1, false);
        assert_ne!(k1, k2);

        std::fs::write(&file, "x = 22\n").unwrap();
        let (k3, _) = cache.build_processed_key(&file, "python", &json!({"a": 1}), 1, false);
        assert_ne!(k1, k3);
    }

    #[test]
    fn token_counts_accumulate_per_model() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let file = dir.path().join("a.py");
        std::fs::write(&file, "x = 1\n").unwrap();

        let (_, path) = cache.build_raw_tokens_key(&file);
        cache.update_tokens(&path, "o3", "raw", 42);
        cache.update_tokens(&path, "gpt-4o", "raw", 40);
        assert_eq!(cache.get_tokens(&path, "o3", "raw"), Some(42));
        assert_eq!(cache.get_tokens(&path, "gpt-4o", "raw"), Some(40));
        assert_eq!(cache.get_tokens(&path, "o3", "processed"), None);
    }

    #[test]
    fn gitignore_is_ensured() {
        let dir = tempfile::tempdir().unwrap();
        let _cache = cache_in(dir.path());
        let gi = dir.path().join(CACHE_DIR).join(".gitignore");
        assert_eq!(std::fs::read_to_string(gi).unwrap(), "*\n");
    }

    #[test]
    fn timestamps_look_like_iso8601() {
        let ts = iso8601_now();
        assert!(ts.len() == 20 && ts.ends_with('Z') && ts.contains('T'));
    }
}
