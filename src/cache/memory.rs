//! In-memory tile store.
//!
//! An LRU cache for encoded tile payloads keyed by the tile key string. The
//! store tracks the total size of cached payloads in bytes and evicts
//! least-recently-used entries when the capacity is exceeded.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::RwLock;

use super::store::{CacheEntry, CacheStats, CacheStore};

/// Default cache capacity: 100MB
pub const DEFAULT_CACHE_CAPACITY: usize = 100 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Size-bounded LRU store for encoded tiles.
///
/// # Thread Safety
///
/// The store is thread-safe and can be shared across workers via `Arc`.
///
/// # Example
///
/// ```
/// use tile_loader::cache::{CacheEntry, CacheStore, MemoryCacheStore};
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = MemoryCacheStore::new();
///     let entry = CacheEntry::new(Bytes::from_static(b"\x89PNG"));
///
///     cache.put("osm:1/0/0", entry.clone()).await;
///
///     let cached = cache.get("osm:1/0/0").await;
///     assert_eq!(cached.map(|e| e.data), Some(entry.data));
/// }
/// ```
pub struct MemoryCacheStore {
    /// The underlying LRU cache
    cache: RwLock<LruCache<String, CacheEntry>>,

    /// Maximum total size in bytes
    max_size: usize,

    /// Current total size in bytes
    current_size: RwLock<usize>,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCacheStore {
    /// Create a new store with default capacity (100MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create a new store with the specified capacity in bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a new store with specified capacity and maximum entries.
    ///
    /// A `max_entries` of zero is treated as one.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::new(max_entries)),
            max_size,
            current_size: RwLock::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Check if a key is cached without updating LRU order or counters.
    pub async fn contains(&self, key: &str) -> bool {
        let cache = self.cache.read().await;
        cache.contains(key)
    }

    /// Remove a single entry.
    pub async fn remove(&self, key: &str) -> Option<CacheEntry> {
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;

        let entry = cache.pop(key)?;
        *current_size = current_size.saturating_sub(entry.size());
        Some(entry)
    }

    /// Clear all entries from the store.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;
        cache.clear();
        *current_size = 0;
    }

    /// Get the current number of cached entries.
    pub async fn len(&self) -> usize {
        let cache = self.cache.read().await;
        cache.len()
    }

    pub async fn is_empty(&self) -> bool {
        let cache = self.cache.read().await;
        cache.is_empty()
    }

    /// Get the current total size of cached payloads in bytes.
    pub async fn size(&self) -> usize {
        let current_size = self.current_size.read().await;
        *current_size
    }

    /// Get the maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut cache = self.cache.write().await;
        let entry = cache.get(key).cloned();
        if entry.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    async fn put(&self, key: &str, entry: CacheEntry) {
        let entry_size = entry.size();
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;

        // Account for the replaced entry, or for the one the entry bound pushes out
        if let Some((_, old)) = cache.push(key.to_string(), entry) {
            *current_size = current_size.saturating_sub(old.size());
        }
        *current_size += entry_size;

        while *current_size > self.max_size {
            match cache.pop_lru() {
                Some((_, evicted)) => {
                    *current_size = current_size.saturating_sub(evicted.size());
                }
                None => break,
            }
        }
    }

    async fn remove_by_prefix(&self, prefix: &str) -> usize {
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;

        let doomed: Vec<String> = cache
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            if let Some(entry) = cache.pop(key) {
                *current_size = current_size.saturating_sub(entry.size());
            }
        }

        doomed.len()
    }

    async fn stats(&self) -> CacheStats {
        let entries = self.len().await;
        let size_bytes = self.size().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
            size_bytes,
            capacity_bytes: self.max_size,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
