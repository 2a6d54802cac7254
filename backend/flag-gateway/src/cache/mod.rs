/// In-process cache of resolved signed URLs
///
/// This module handles:
/// - Fresh / stale / miss classification per read
/// - Lazy removal of entries past the hard eviction horizon (`expires_at + grace`)
/// - LRU capacity eviction
///
/// Failed resolutions are never stored here.
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A resolved URL for one canonical key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub url: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Create an entry that is fresh for `ttl` from now.
    ///
    /// A zero TTL is bumped to one millisecond so `expires_at > created_at` always holds.
    pub fn new(key: impl Into<String>, url: impl Into<String>, ttl: Duration) -> Self {
        let created_at = Instant::now();
        let ttl = ttl.max(Duration::from_millis(1));
        Self {
            key: key.into(),
            url: url.into(),
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Outcome of a cache read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Within TTL
    Fresh(CacheEntry),
    /// Past TTL but within the grace window; serve and refresh
    Stale(CacheEntry),
    /// Absent or past the hard horizon
    Miss,
}

/// Bounded URL cache with stale-while-revalidate reads
pub struct UrlCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    grace: Duration,
}

impl UrlCache {
    pub fn new(capacity: NonZeroUsize, grace: Duration) -> Self {
        debug!(capacity = capacity.get(), grace_secs = grace.as_secs(), "Initializing URL cache");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            grace,
        }
    }

    /// Read an entry. Never blocks on I/O; promotes the key in LRU order.
    pub fn get(&self, key: &str) -> CacheLookup {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let entry = match entries.get(key) {
            Some(entry) => entry.clone(),
            None => return CacheLookup::Miss,
        };

        if entry.is_fresh_at(now) {
            CacheLookup::Fresh(entry)
        } else if now < entry.expires_at + self.grace {
            CacheLookup::Stale(entry)
        } else {
            entries.pop(key);
            debug!(key = %key, "Evicted entry past grace window");
            CacheLookup::Miss
        }
    }

    /// Insert or overwrite the entry for `entry.key`
    pub fn put(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                debug!(key = %evicted, "Evicted least recently used entry");
            }
        }
    }

    /// Drop an entry regardless of freshness
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
