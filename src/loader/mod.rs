//! Tile loader façade.
//!
//! A [`TileLoader`] binds a cache store, a fetcher, a listener, network
//! settings and a download executor together and hands out [`TileJob`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tile_loader::{MemoryCacheStore, TemplateTileSource, Tile, TileLoader};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = TileLoader::builder()
//!     .cache(Arc::new(MemoryCacheStore::new()))
//!     .host_limit(4)
//!     .build()?;
//!
//! let source = Arc::new(TemplateTileSource::new(
//!     "osm",
//!     "https://tile.example.org/{z}/{x}/{y}.png",
//! ));
//! let tile = Arc::new(Tile::new(source, 3, 4, 2));
//!
//! loader.load_tile(Arc::clone(&tile), false)?;
//! # Ok(())
//! # }
//! ```

mod job;
mod listener;

use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use parking_lot::RwLock;
use tracing::info;

use crate::cache::{CacheStats, CacheStore, FreshnessPolicy, HonorExpiry};
use crate::error::{ConfigError, JobError};
use crate::executor::{
    DownloadExecutor, ExecutorConfig, DEFAULT_HOST_LIMIT, DEFAULT_WORKER_LIMIT,
};
use crate::net::{HttpFetcher, TileFetcher, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use crate::tile::{Tile, TileKey, TileSource};

pub use job::{JobState, SubmitOutcome, TileJob};
pub use listener::{ChannelListener, LoadEvent, LoadOutcome, NoopListener, TileLoaderListener};

/// Per-fetch network settings shared by every job of a loader.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,

    /// Extra headers sent with every tile request
    pub headers: HeaderMap,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            headers: HeaderMap::new(),
        }
    }
}

/// Collaborators a job is pre-bound to.
#[derive(Clone)]
pub(crate) struct JobContext {
    pub(crate) cache: Arc<dyn CacheStore>,
    pub(crate) fetcher: Arc<dyn TileFetcher>,
    pub(crate) freshness: Arc<dyn FreshnessPolicy>,
    pub(crate) listener: Arc<dyn TileLoaderListener>,
    pub(crate) network: Arc<NetworkSettings>,
}

/// Entry point for loading tiles through the cache and the download pool.
///
/// Safe to share across tasks; the only mutable state is the executor
/// reference, which may be swapped at any time. Jobs keep the executor that
/// was current when they were created.
pub struct TileLoader {
    context: JobContext,
    executor: RwLock<DownloadExecutor>,
}

impl TileLoader {
    pub fn builder() -> TileLoaderBuilder {
        TileLoaderBuilder::default()
    }

    /// Create a job for `tile`. The job is not scheduled until submitted.
    pub fn create_job(&self, tile: Arc<Tile>) -> Arc<TileJob> {
        let executor = self.executor.read().clone();
        Arc::new(TileJob::new(tile, self.context.clone(), executor))
    }

    /// Create and submit a job in one step.
    pub fn load_tile(&self, tile: Arc<Tile>, force: bool) -> Result<SubmitOutcome, JobError> {
        self.create_job(tile).submit(force)
    }

    /// Remove every cached tile of `source`.
    ///
    /// Returns the number of entries removed.
    pub async fn clear_cache(&self, source: &dyn TileSource) -> usize {
        let prefix = TileKey::source_prefix(source.name());
        let removed = self.context.cache.remove_by_prefix(&prefix).await;
        info!(source = source.name(), removed, "cleared tile cache");
        removed
    }

    /// Drop all jobs that have not started yet and roll each back.
    ///
    /// Running jobs finish normally. Returns the number of jobs rolled back.
    pub fn cancel_outstanding_tasks(&self) -> usize {
        let executor = self.executor.read().clone();
        executor.cancel_queued()
    }

    /// `true` while the current executor has queued or running tasks.
    pub fn has_outstanding_tasks(&self) -> bool {
        self.executor.read().has_outstanding_tasks()
    }

    /// Advisory snapshot of the cache counters.
    pub async fn stats(&self) -> CacheStats {
        self.context.cache.stats().await
    }

    /// Replace the executor used by jobs created from now on.
    pub fn set_download_executor(&self, executor: DownloadExecutor) {
        *self.executor.write() = executor;
    }

    pub fn download_executor(&self) -> DownloadExecutor {
        self.executor.read().clone()
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.context.cache
    }

    pub fn network_settings(&self) -> &NetworkSettings {
        &self.context.network
    }
}

impl std::fmt::Debug for TileLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLoader")
            .field("network", &self.context.network)
            .field("freshness", &self.context.freshness)
            .field("executor", &*self.executor.read())
            .finish()
    }
}

/// Builder for [`TileLoader`].
///
/// Only the cache is required. Limits are ignored when an explicit executor
/// is supplied.
#[derive(Default)]
pub struct TileLoaderBuilder {
    cache: Option<Arc<dyn CacheStore>>,
    fetcher: Option<Arc<dyn TileFetcher>>,
    listener: Option<Arc<dyn TileLoaderListener>>,
    freshness: Option<Arc<dyn FreshnessPolicy>>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    headers: HeaderMap,
    host_limit: Option<usize>,
    max_workers: Option<usize>,
    executor: Option<DownloadExecutor>,
}

impl TileLoaderBuilder {
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn TileFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn TileLoaderListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn freshness(mut self, freshness: Arc<dyn FreshnessPolicy>) -> Self {
        self.freshness = Some(freshness);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn host_limit(mut self, limit: usize) -> Self {
        self.host_limit = Some(limit);
        self
    }

    pub fn max_workers(mut self, limit: usize) -> Self {
        self.max_workers = Some(limit);
        self
    }

    /// Use an existing executor, typically one shared with other loaders.
    pub fn executor(mut self, executor: DownloadExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<TileLoader, ConfigError> {
        let cache = self.cache.ok_or(ConfigError::MissingCache)?;

        let network = NetworkSettings {
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT),
            headers: self.headers,
        };

        let executor = match self.executor {
            Some(executor) => executor,
            None => DownloadExecutor::new(
                ExecutorConfig::default()
                    .with_host_limit(self.host_limit.unwrap_or(DEFAULT_HOST_LIMIT))
                    .with_max_workers(self.max_workers.unwrap_or(DEFAULT_WORKER_LIMIT)),
            )?,
        };

        let fetcher: Arc<dyn TileFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::with_timeouts(
                network.connect_timeout,
                network.read_timeout,
            )?),
        };

        Ok(TileLoader {
            context: JobContext {
                cache,
                fetcher,
                freshness: self
                    .freshness
                    .unwrap_or_else(|| Arc::new(HonorExpiry::default())),
                listener: self.listener.unwrap_or_else(|| Arc::new(NoopListener)),
                network: Arc::new(network),
            },
            executor: RwLock::new(executor),
        })
    }
}
