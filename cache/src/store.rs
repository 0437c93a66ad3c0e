use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use diarization_infra_common::sanitize_filename;
use serde_json::Value;
use tracing::warn;

use diarization_domain::{CacheLookup, CacheStore};

/// A directory of `<key>.json` files with TTL-on-read expiry. Reads never
/// "touch" mtime and stale entries are deleted, never served (§9). Writes go
/// through a temp-file-then-rename so a half-written payload never becomes a
/// readable cache entry (§9). Best-effort: any IO error on read is a miss,
/// any IO error on write is logged and swallowed (§4.1).
pub struct FileCacheStore {
    dir: PathBuf,
    ttl: Option<Duration>,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Option<Duration>) -> Self {
        Self { dir: dir.into(), ttl }
    }

    /// 30-day TTL, the default for all three caches (§4.1).
    pub fn with_default_ttl(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, Some(Duration::from_secs(30 * 24 * 60 * 60)))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_filename(key)))
    }

    async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    fn is_stale(&self, modified: SystemTime) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age > ttl,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &str) -> CacheLookup {
        let path = self.entry_path(key);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(_) => return CacheLookup::Miss,
        };

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(_) => return CacheLookup::Miss,
        };

        if self.is_stale(modified) {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                warn!(key, error = %err, "failed to delete stale cache entry");
            }
            return CacheLookup::Miss;
        }

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(_) => return CacheLookup::Miss,
        };

        match serde_json::from_slice::<Value>(&raw) {
            Ok(value) => CacheLookup::Hit(value),
            Err(err) => {
                warn!(key, error = %err, "cache entry is not valid JSON, treating as miss");
                CacheLookup::Miss
            }
        }
    }

    async fn put(&self, key: &str, payload: &Value) {
        if let Err(err) = self.ensure_dir().await {
            warn!(key, error = %err, "failed to create cache directory");
            return;
        }

        let final_path = self.entry_path(key);
        let tmp_path = self.dir.join(format!(".{}.{}.tmp", sanitize_filename(key), uuid::Uuid::new_v4()));

        let serialized = match serde_json::to_vec_pretty(payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key, error = %err, "failed to serialize cache payload");
                return;
            }
        };

        if let Err(err) = tokio::fs::write(&tmp_path, &serialized).await {
            warn!(key, error = %err, "failed to write cache temp file");
            return;
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &final_path).await {
            warn!(key, error = %err, "failed to finalize cache entry");
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
    }

    async fn invalidate_all(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                let _ = tokio::fs::remove_file(path).await;
            }
        }
    }

    async fn export_all(&self) -> Vec<(String, Value)> {
        let mut results = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return results;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(raw) = tokio::fs::read(&path).await {
                if let Ok(value) = serde_json::from_slice::<Value>(&raw) {
                    results.push((stem.to_string(), value));
                }
            }
        }
        results
    }
}

/// A cache that never hits and never persists — the `SEPARATION_CACHE_ENABLED
/// = false` / `LLM_CACHE_ENABLED = false` case where the feature should be
/// off entirely rather than merely re-tuned (§6).
pub struct NullCacheStore;

#[async_trait]
impl CacheStore for NullCacheStore {
    async fn get(&self, _key: &str) -> CacheLookup {
        CacheLookup::Miss
    }
    async fn put(&self, _key: &str, _payload: &Value) {}
    async fn invalidate_all(&self) {}
    async fn export_all(&self) -> Vec<(String, Value)> {
        Vec::new()
    }
}

/// Re-materializes a cached separation payload by discarding any stored
/// download URLs — PyAnnote/SpeechBrain per-stem URLs expire, so a cache hit
/// must never trust the URLs inside the stored JSON (§4.1 correctness
/// property). Callers regenerate fresh URLs for the stems named here.
pub fn stem_names_from_cached_payload(payload: &Value) -> Vec<String> {
    payload
        .get("stems")
        .and_then(Value::as_array)
        .map(|stems| {
            stems
                .iter()
                .filter_map(|stem| stem.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn path_for(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", sanitize_filename(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCacheStore::with_default_ttl(dir.path());
        cache.put("my-key", &json!({"hello": "world"})).await;
        let hit = cache.get("my-key").await;
        match hit {
            CacheLookup::Hit(value) => assert_eq!(value["hello"], "world"),
            CacheLookup::Miss => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCacheStore::with_default_ttl(dir.path());
        assert!(matches!(cache.get("nope").await, CacheLookup::Miss));
    }

    #[tokio::test]
    async fn stale_entries_are_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCacheStore::new(dir.path(), Some(Duration::from_millis(1)));
        cache.put("stale-key", &json!({"a": 1})).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(cache.get("stale-key").await, CacheLookup::Miss));
        assert!(!path_for(dir.path(), "stale-key").exists());
    }

    #[tokio::test]
    async fn invalidate_all_removes_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCacheStore::with_default_ttl(dir.path());
        cache.put("a", &json!(1)).await;
        cache.put("b", &json!(2)).await;
        cache.invalidate_all().await;
        assert!(matches!(cache.get("a").await, CacheLookup::Miss));
        assert!(matches!(cache.get("b").await, CacheLookup::Miss));
    }

    #[tokio::test]
    async fn null_cache_store_never_hits() {
        let cache = NullCacheStore;
        cache.put("a", &json!(1)).await;
        assert!(matches!(cache.get("a").await, CacheLookup::Miss));
        assert!(cache.export_all().await.is_empty());
    }

    #[tokio::test]
    async fn export_all_returns_every_live_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCacheStore::with_default_ttl(dir.path());
        cache.put("a", &json!(1)).await;
        cache.put("b", &json!(2)).await;
        let mut exported = cache.export_all().await;
        exported.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].0, "a");
    }
}
