//! Named, persistent request → response stores.
//!
//! ```text
//! CacheStorage
//!     ├── "app-v1" (Cache)
//!     │       └── RequestKey (method + URL) → CacheEntry
//!     └── "app-v2" (Cache)
//! ```
//!
//! Stores live in memory and, when a directory is attached, are written out
//! as one JSON document per store on [`CacheStorage::persist`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use offline_net::{Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Errors raised by cache storage.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Identity of a cached request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        Self {
            method: method.as_str().to_string(),
            url: url.as_str().to_string(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn of(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers in order. Repeated names keep every value.
    pub headers: Vec<(String, String)>,

    /// Response origin classification.
    pub response_type: ResponseType,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response under the identity of `request`.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: request.url.clone(),
            method: request.method.as_str().to_string(),
            status: response.status.as_u16(),
            headers,
            response_type: response.response_type,
            body: response.body().clone(),
            cached_at: now_millis(),
        }
    }

    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.clone(),
            url: self.url.as_str().to_string(),
        }
    }

    /// Bytes charged against the quota.
    pub fn size(&self) -> u64 {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        (self.body.len() + headers) as u64
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        let mut response = Response::new(
            self.url.clone(),
            status,
            self.response_type,
            self.body.clone(),
        );
        response.headers = headers;
        response
    }
}

/// A single named store.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Creation timestamp (ms since epoch).
    pub created_at: u64,

    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: now_millis(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert or overwrite an entry.
    fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.key(), entry)
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes held by this store.
    pub fn size(&self) -> u64 {
        self.entries.values().map(CacheEntry::size).sum()
    }

    fn entry_size(&self, key: &RequestKey) -> u64 {
        self.entries.get(key).map(CacheEntry::size).unwrap_or(0)
    }
}

/// On-disk form of a store.
#[derive(Serialize, Deserialize)]
struct PersistedCache {
    name: String,
    created_at: u64,
    entries: Vec<CacheEntry>,
}

/// Lookup and write counters.
#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    writes: AtomicU64,
}

/// Snapshot of storage activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub lookups: u64,
    pub writes: u64,
}

/// Cache storage (all stores of one origin).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
    dir: Option<PathBuf>,
    quota_bytes: Option<u64>,
    dirty: HashSet<String>,
    removed: HashSet<String>,
    counters: Counters,
}

impl CacheStorage {
    /// Create new in-memory cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total bytes held across all stores.
    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    /// Open storage backed by `dir`, restoring any stores persisted there.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut restored = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(item) = read_dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<PersistedCache>(&raw) {
                Ok(persisted) => restored.push(persisted),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache file"),
            }
        }
        restored.sort_by_key(|p| p.created_at);

        let mut storage = Self {
            dir: Some(dir.clone()),
            ..Self::default()
        };
        for persisted in restored {
            let mut cache = Cache {
                name: persisted.name.clone(),
                created_at: persisted.created_at,
                entries: HashMap::new(),
            };
            for entry in persisted.entries {
                cache.put(entry);
            }
            storage.order.push(persisted.name.clone());
            storage.caches.insert(persisted.name, cache);
        }

        info!(dir = %dir.display(), caches = storage.order.len(), "Cache storage loaded");
        Ok(storage)
    }

    /// Write changed stores to disk and drop files of deleted ones.
    ///
    /// A name leaves the pending sets only once its I/O succeeded, so a failed
    /// call can be retried.
    pub async fn persist(&mut self) -> Result<(), CacheError> {
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };
        tokio::fs::create_dir_all(&dir).await?;

        // Current stores reach disk before superseded ones leave it.
        let dirty: Vec<String> = self.dirty.iter().cloned().collect();
        for name in dirty {
            if let Some(cache) = self.caches.get(&name) {
                let persisted = PersistedCache {
                    name: cache.name.clone(),
                    created_at: cache.created_at,
                    entries: cache.entries.values().cloned().collect(),
                };
                let path = cache_file(&dir, &name);
                let tmp = path.with_extension("json.tmp");
                tokio::fs::write(&tmp, serde_json::to_vec(&persisted)?).await?;
                tokio::fs::rename(&tmp, &path).await?;
                trace!(cache = %name, entries = persisted.entries.len(), "Persisted cache");
            }
            self.dirty.remove(&name);
        }

        let removed: Vec<String> = self.removed.iter().cloned().collect();
        for name in removed {
            match tokio::fs::remove_file(cache_file(&dir, &name)).await {
                Ok(()) => debug!(cache = %name, "Removed persisted cache"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to remove persisted cache");
                    return Err(e.into());
                }
            }
            self.removed.remove(&name);
        }
        Ok(())
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            debug!(cache = %name, "Creating cache");
            self.order.push(name.to_string());
            self.removed.remove(name);
            self.dirty.insert(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache by name.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        if self.caches.remove(name).is_none() {
            return false;
        }
        self.order.retain(|n| n != name);
        self.dirty.remove(name);
        self.removed.insert(name.to_string());
        true
    }

    /// Get all cache names in creation order.
    pub fn keys(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Match across all caches, oldest first.
    pub fn match_request(&self, key: &RequestKey) -> Option<CacheEntry> {
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        self.order
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(key))
            .cloned()
    }

    /// Store one entry in the existing cache `name`.
    ///
    /// Never creates a cache, so a store deleted by activation stays deleted.
    pub fn put(&mut self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if !self.caches.contains_key(name) {
            return Err(CacheError::NotFound(name.to_string()));
        }
        self.put_all(name, vec![entry])
    }

    /// Store every entry in `name`, or none of them. Creates the cache if
    /// needed.
    pub fn put_all(&mut self, name: &str, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        if let Some(quota) = self.quota_bytes {
            let existing = self.caches.get(name);
            let mut seen = HashSet::new();
            let mut freed = 0u64;
            let mut needed = 0u64;
            for entry in &entries {
                let key = entry.key();
                if seen.insert(key.clone()) {
                    freed += existing.map(|c| c.entry_size(&key)).unwrap_or(0);
                }
                needed += entry.size();
            }
            let available = quota.saturating_sub(self.total_bytes().saturating_sub(freed));
            if needed > available {
                return Err(CacheError::QuotaExceeded { needed, available });
            }
        }

        let count = entries.len() as u64;
        let cache = self.open(name);
        for entry in entries {
            trace!(cache = %name, url = %entry.url, "Storing entry");
            cache.put(entry);
        }
        self.dirty.insert(name.to_string());
        self.counters.writes.fetch_add(count, Ordering::Relaxed);
        Ok(())
    }

    /// Bytes held across all caches.
    pub fn total_bytes(&self) -> u64 {
        self.caches.values().map(Cache::size).sum()
    }

    pub fn quota_bytes(&self) -> Option<u64> {
        self.quota_bytes
    }

    /// Lookup and write counts since creation.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.counters.lookups.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }
}

fn cache_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", URL_SAFE_NO_PAD.encode(name)))
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
