//! # Tile Loader
//!
//! An asynchronous, cache-backed tile fetching subsystem for map clients.
//!
//! Tiles are looked up in a shared cache store and fetched from their tile
//! server on a miss. Downloads run on a bounded worker pool whose admission
//! queue additionally limits concurrent requests per host, and jobs that have
//! not started yet can be cancelled without leaving tiles stuck in the
//! loading state.
//!
//! ## Architecture
//!
//! - [`tile`] - Tiles, cache keys and tile sources
//! - [`cache`] - Cache store contract, in-memory store and freshness policies
//! - [`net`] - Fetch contract and the HTTP fetcher
//! - [`executor`] - Download pool with per-host admission
//! - [`loader`] - Loader façade, tile jobs and listeners
//! - [`config`] - CLI configuration for the bundled binary
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tile_loader::{ChannelListener, MemoryCacheStore, TemplateTileSource, Tile, TileLoader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (listener, mut events) = ChannelListener::new();
//!     let loader = TileLoader::builder()
//!         .cache(Arc::new(MemoryCacheStore::new()))
//!         .listener(Arc::new(listener))
//!         .build()?;
//!
//!     let source = Arc::new(TemplateTileSource::new(
//!         "osm",
//!         "https://tile.example.org/{z}/{x}/{y}.png",
//!     ));
//!     loader.load_tile(Arc::new(Tile::new(source, 0, 0, 0)), false)?;
//!
//!     if let Some(event) = events.recv().await {
//!         println!("{} finished: {:?}", event.key, event.outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod loader;
pub mod net;
pub mod tile;

// Re-export commonly used types
pub use cache::{
    AlwaysFresh, CacheEntry, CacheStats, CacheStore, FreshnessPolicy, HonorExpiry, MaxAge,
    MemoryCacheStore, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_AGE,
};
pub use config::Config;
pub use error::{ConfigError, FetchError, JobError, TileError};
pub use executor::{
    Admission, AdmissionQueue, DownloadExecutor, DownloadTask, ExecutorConfig, DEFAULT_HOST_LIMIT,
    DEFAULT_KEEP_ALIVE, DEFAULT_WORKER_LIMIT,
};
pub use loader::{
    ChannelListener, JobState, LoadEvent, LoadOutcome, NetworkSettings, NoopListener,
    SubmitOutcome, TileJob, TileLoader, TileLoaderBuilder, TileLoaderListener,
};
pub use net::{
    host_key, FetchRequest, FetchResponse, HttpFetcher, TileFetcher, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_READ_TIMEOUT,
};
pub use tile::{TemplateTileSource, Tile, TileImage, TileKey, TileSource, KEY_SEPARATOR};
