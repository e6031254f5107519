//! TTL result cache.
//!
//! Maps a fingerprint of (normalized query text, sorted parameters) to an
//! opaque cached payload. Entries expire lazily: an expired entry is evicted
//! by the lookup that finds it, plus `evict_expired` for bulk cleanup on a
//! schedule. The cache never surfaces errors to callers; a poisoned lock
//! degrades to a forced miss.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::request::QueryRequest;

/// Deterministic fingerprint of a query plus its parameters.
///
/// Computed with a cryptographic-strength digest (blake3) over the
/// whitespace-normalized query text and the canonically-ordered parameter
/// map, so identical inputs always collide and distinguishable inputs
/// practically never do.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CacheKey {
    hash: [u8; 32],
}

impl CacheKey {
    /// Fingerprint a query and its parameters.
    pub fn new(sql: &str, params: &BTreeMap<String, serde_json::Value>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalize(sql).as_bytes());
        for (name, value) in params {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b";");
        }
        Self {
            hash: *hasher.finalize().as_bytes(),
        }
    }

    /// Fingerprint a request.
    pub fn for_request(request: &QueryRequest) -> Self {
        Self::new(&request.sql, &request.params)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.hash))
    }
}

/// Collapse runs of whitespace so formatting differences don't defeat caching.
fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One cached result.
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Arc<serde_json::Value>,
    fingerprint: CacheKey,
    created_at: Instant,
    expires_at: Instant,
    approx_bytes: usize,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Lookup hits.
    pub hits: u64,
    /// Lookup misses.
    pub misses: u64,
    /// `hits / (hits + misses)`, 0.0 before any lookup.
    pub hit_rate: f64,
    /// Live entry count.
    pub entries: usize,
    /// Approximate memory footprint of cached payloads in bytes.
    pub approx_bytes: usize,
}

/// Thread-safe TTL cache for query results.
pub struct ResultCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached payload.
    ///
    /// Returns the payload iff it is present and unexpired. A
    /// present-but-expired entry is removed as a side effect. Every call
    /// bumps exactly one of the hit/miss counters.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<serde_json::Value>> {
        let now = Instant::now();
        let expired = {
            let guard = match self.entries.read() {
                Ok(guard) => guard,
                Err(_) => {
                    self.misses.fetch_add(1, AtomicOrdering::Relaxed);
                    return None;
                }
            };
            match guard.get(key) {
                Some(entry) if now < entry.expires_at => {
                    self.hits.fetch_add(1, AtomicOrdering::Relaxed);
                    return Some(entry.payload.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            if let Ok(mut guard) = self.entries.write() {
                // Re-check under the write lock; a concurrent put may have
                // refreshed the entry.
                if guard.get(key).is_some_and(|e| now >= e.expires_at) {
                    guard.remove(key);
                }
            }
        }

        self.misses.fetch_add(1, AtomicOrdering::Relaxed);
        None
    }

    /// Store or overwrite a payload with `expires_at = now + ttl`.
    pub fn put(&self, key: CacheKey, payload: Arc<serde_json::Value>, ttl: Duration) {
        let now = Instant::now();
        let approx_bytes = serde_json::to_string(payload.as_ref())
            .map(|s| s.len())
            .unwrap_or(0);
        let entry = CacheEntry {
            payload,
            fingerprint: key,
            created_at: now,
            expires_at: now + ttl,
            approx_bytes,
        };
        if let Ok(mut guard) = self.entries.write() {
            guard.insert(key, entry);
        }
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut guard) = self.entries.write() else {
            return 0;
        };
        let before = guard.len();
        guard.retain(|_, entry| now < entry.expires_at);
        before - guard.len()
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(AtomicOrdering::Relaxed);
        let misses = self.misses.load(AtomicOrdering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        let (entries, approx_bytes) = match self.entries.read() {
            Ok(guard) => (guard.len(), guard.values().map(|e| e.approx_bytes).sum()),
            Err(_) => (0, 0),
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            entries,
            approx_bytes,
        }
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.write() {
            guard.clear();
        }
    }

    /// Age of the entry for `key`, if present. Exposed for diagnostics.
    pub fn entry_age(&self, key: &CacheKey) -> Option<Duration> {
        let guard = self.entries.read().ok()?;
        guard.get(key).map(|e| e.created_at.elapsed())
    }

    /// Source-query fingerprint recorded on the entry for `key`.
    pub fn entry_fingerprint(&self, key: &CacheKey) -> Option<CacheKey> {
        let guard = self.entries.read().ok()?;
        guard.get(key).map(|e| e.fingerprint)
    }
}
