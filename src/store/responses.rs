//! Cached HTTP responses for the app shell and API endpoints.
//!
//! Keyed by request path, one file per entry, same write discipline as the
//! main store. Reads degrade to a miss on any failure and writes are
//! best-effort: a broken response cache must never break serving a page.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::router::Response;

use super::CachedData;

/// A stored response with the time it was cached.
pub type CachedResponse = CachedData<Response>;

/// File-backed response cache. Clone is cheap and all clones share the
/// same directory.
#[derive(Clone)]
pub struct ResponseCache {
    dir: Arc<PathBuf>,
}

impl ResponseCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create response cache at {}", dir.display()))?;
        Ok(Self { dir: Arc::new(dir) })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }

    /// Look up a cached response. Misses and unreadable entries both come
    /// back as `None`.
    pub async fn get(&self, key: &str) -> Option<Response> {
        let path = self.entry_path(key);
        read_entry(&path).map(|cached| cached.data)
    }

    /// Store a copy of a response. Only plain-success responses are kept;
    /// caching a redirect or error page would poison later offline reads.
    /// Errors are logged and swallowed.
    pub async fn put(&self, key: &str, response: &Response) {
        if response.status != 200 {
            debug!(key, status = response.status, "Not caching non-200 response");
            return;
        }
        let path = self.entry_path(key);
        if let Err(e) = write_entry(&path, response) {
            warn!(key, error = %e, "Failed to cache response");
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
}

fn read_entry(path: &Path) -> Option<CachedResponse> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable cache entry");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(cached) => Some(cached),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed cache entry, treating as miss");
            None
        }
    }
}

fn write_entry(path: &Path, response: &Response) -> Result<()> {
    let cached = CachedData::new(response.clone());
    let contents = serde_json::to_string(&cached)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Longest readable prefix kept in an entry file name; CDN URLs can get
/// long and the hash suffix already guarantees uniqueness.
const MAX_KEY_PREFIX: usize = 80;

/// Turn a request path (or absolute URL for CDN assets) into a flat file
/// name. The readable prefix is for debugging only; a hash of the raw key
/// keeps distinct keys distinct ("/events" vs "/_events").
fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .take(MAX_KEY_PREFIX)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{:016x}", cleaned, seahash::hash(key.as_bytes()))
}

// ============================================================================
// Tests
// ============================================================================
