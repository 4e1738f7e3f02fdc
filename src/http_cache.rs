use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const CACHE_VERSION: u32 = 1;
const CACHE_DIR: &str = "fpl_price_watch";
const CACHE_FILE: &str = "http_cache.json";

static CACHE: Mutex<Option<HttpCacheFile>> = Mutex::new(None);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct HttpCacheFile {
    version: u32,
    entries: HashMap<String, CacheEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    body: String,
    etag: Option<String>,
    last_modified: Option<String>,
    fetched_at: u64,
}

impl CacheEntry {
    fn is_fresh(&self, now_secs: u64, max_age_secs: u64) -> bool {
        max_age_secs > 0 && now_secs.saturating_sub(self.fetched_at) < max_age_secs
    }
}

/// GETs `url`, serving the cached body while it is younger than `max_age_secs`
/// and revalidating with ETag/Last-Modified afterwards. Errors are never masked
/// with a stale body.
pub fn fetch_json_cached(client: &Client, url: &str, max_age_secs: u64) -> Result<String> {
    let now = now_secs();
    let cached_entry = lock_cache()
        .get_or_insert_with(load_cache_file)
        .entries
        .get(url)
        .cloned();

    if let Some(entry) = cached_entry.as_ref() {
        if entry.is_fresh(now, max_age_secs) {
            debug!(url, age_secs = now.saturating_sub(entry.fetched_at), "http cache hit");
            return Ok(entry.body.clone());
        }
    }

    let mut req = client.get(url);
    if let Some(entry) = cached_entry.as_ref() {
        if let Some(etag) = entry.etag.as_ref() {
            req = req.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = entry.last_modified.as_ref() {
            req = req.header(IF_MODIFIED_SINCE, last_modified);
        }
    }

    let resp = req.send().with_context(|| format!("GET {url}"))?;
    let status = resp.status();
    if status == StatusCode::NOT_MODIFIED {
        let Some(mut entry) = cached_entry else {
            return Err(anyhow!("received 304 without cache body for {url}"));
        };
        debug!(url, "http cache revalidated");
        entry.fetched_at = now;
        let body = entry.body.clone();
        store_entry(url, entry);
        return Ok(body);
    }

    let etag = header_string(resp.headers(), ETAG);
    let last_modified = header_string(resp.headers(), LAST_MODIFIED);
    let body = resp.text().context("failed reading body")?;
    if !status.is_success() {
        return Err(anyhow!("http {status} from {url}"));
    }

    store_entry(
        url,
        CacheEntry {
            body: body.clone(),
            etag,
            last_modified,
            fetched_at: now,
        },
    );
    Ok(body)
}

/// `$XDG_CACHE_HOME/fpl_price_watch`, falling back to `~/.cache/fpl_price_watch`.
pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(CACHE_DIR));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

fn header_string(
    headers: &reqwest::header::HeaderMap,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn lock_cache() -> MutexGuard<'static, Option<HttpCacheFile>> {
    CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn store_entry(key: &str, entry: CacheEntry) {
    let mut guard = lock_cache();
    let cache = guard.get_or_insert_with(load_cache_file);
    cache.version = CACHE_VERSION;
    cache.entries.insert(key.to_string(), entry);
    if let Err(err) = save_cache_file(cache) {
        warn!(error = %err, "http cache not persisted");
    }
}

fn load_cache_file() -> HttpCacheFile {
    let Some(path) = cache_path() else {
        return HttpCacheFile::default();
    };
    let Ok(raw) = fs::read_to_string(path) else {
        return HttpCacheFile::default();
    };
    let cache = serde_json::from_str::<HttpCacheFile>(&raw).unwrap_or_default();
    if cache.version != CACHE_VERSION {
        return HttpCacheFile::default();
    }
    cache
}

fn save_cache_file(cache: &HttpCacheFile) -> Result<()> {
    let Some(path) = cache_path() else {
        return Ok(());
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("create cache dir")?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(cache).context("serialize http cache")?;
    fs::write(&tmp, json).context("write http cache")?;
    fs::rename(&tmp, &path).context("swap http cache")?;
    Ok(())
}

fn cache_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join(CACHE_FILE))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
