//! Cache store contract and the in-memory store.
//!
//! Tile jobs read and write encoded tiles through the [`CacheStore`] trait;
//! whether a hit may be served is decided by a pluggable [`FreshnessPolicy`].

mod freshness;
mod memory;
mod store;

pub use freshness::{AlwaysFresh, FreshnessPolicy, HonorExpiry, MaxAge, DEFAULT_MAX_AGE};
pub use memory::{MemoryCacheStore, DEFAULT_CACHE_CAPACITY};
pub use store::{CacheEntry, CacheStats, CacheStore};
