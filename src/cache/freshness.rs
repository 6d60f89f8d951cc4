use std::fmt::Debug;
use std::time::{Duration, SystemTime};

use super::store::CacheEntry;

/// Default max-age for entries without a server-provided expiry: 7 days.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Decides whether a cached entry may be served without refetching.
pub trait FreshnessPolicy: Send + Sync + Debug {
    fn is_fresh(&self, entry: &CacheEntry, now: SystemTime) -> bool;
}

/// Every cached entry is served, regardless of age.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFresh;

impl FreshnessPolicy for AlwaysFresh {
    fn is_fresh(&self, _entry: &CacheEntry, _now: SystemTime) -> bool {
        true
    }
}

/// Entries are fresh until they are older than a fixed age.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge(pub Duration);

impl FreshnessPolicy for MaxAge {
    fn is_fresh(&self, entry: &CacheEntry, now: SystemTime) -> bool {
        age(entry, now) <= self.0
    }
}

/// Honors the expiry the server sent; falls back to a max-age otherwise.
#[derive(Debug, Clone, Copy)]
pub struct HonorExpiry {
    pub fallback_max_age: Duration,
}

impl Default for HonorExpiry {
    fn default() -> Self {
        Self {
            fallback_max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl FreshnessPolicy for HonorExpiry {
    fn is_fresh(&self, entry: &CacheEntry, now: SystemTime) -> bool {
        match entry.expires_at {
            Some(expires_at) => now < expires_at,
            None => age(entry, now) <= self.fallback_max_age,
        }
    }
}

// Entries stamped in the future (clock skew) count as brand new.
fn age(entry: &CacheEntry, now: SystemTime) -> Duration {
    now.duration_since(entry.fetched_at).unwrap_or(Duration::ZERO)
}
