use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

/// One encoded tile image held by a cache store.
///
/// Entries are immutable once written; replacing a tile means writing a new
/// entry under the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Encoded image payload
    pub data: Bytes,

    /// MIME type reported when the tile was fetched
    pub content_type: Option<String>,

    /// When the payload was fetched
    pub fetched_at: SystemTime,

    /// Server-provided expiry, if the response carried one
    pub expires_at: Option<SystemTime>,
}

impl CacheEntry {
    /// Create an entry fetched now, without an expiry hint.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            content_type: None,
            fetched_at: SystemTime::now(),
            expires_at: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_fetched_at(mut self, fetched_at: SystemTime) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    pub fn with_expires_at(mut self, expires_at: Option<SystemTime>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Advisory cache counters.
///
/// Collected without a global lock; the fields may be mutually inconsistent
/// under concurrent traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub size_bytes: usize,
    pub capacity_bytes: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits: {}, misses: {}, entries: {}, size: {}/{} bytes",
            self.hits, self.misses, self.entries, self.size_bytes, self.capacity_bytes
        )
    }
}

/// Shared key/entry store consumed by tile jobs.
///
/// Implementations must tolerate arbitrary concurrent traffic from many
/// workers. Eviction is the store's own business.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up an entry.
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Insert or replace an entry.
    async fn put(&self, key: &str, entry: CacheEntry);

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    async fn remove_by_prefix(&self, prefix: &str) -> usize;

    /// Snapshot of the store's counters.
    async fn stats(&self) -> CacheStats;
}
