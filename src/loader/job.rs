//! Tile job: one fetch-or-cache-hit cycle for one tile.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──submit──► Queued ──start──► Running ──► Completed | Failed
//!                       │
//!                       └──cancel──► Cancelled
//! ```
//!
//! The tile claim is taken at submission, so a queued job always owns the
//! claim it must release on cancellation. A job whose tile is already claimed
//! completes immediately without queueing.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::listener::LoadOutcome;
use super::JobContext;
use crate::cache::CacheEntry;
use crate::error::{FetchError, JobError, TileError};
use crate::executor::{Admission, DownloadExecutor, DownloadTask};
use crate::net::{host_key, FetchRequest};
use crate::tile::{Tile, TileImage, TileKey};

/// Observable job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Created,
            1 => JobState::Queued,
            2 => JobState::Running,
            3 => JobState::Completed,
            4 => JobState::Failed,
            _ => JobState::Cancelled,
        }
    }

    /// `true` for states a job never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// What happened when a job was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Admitted; runs as soon as a worker is free
    Dispatched,

    /// Parked behind other jobs for the same host
    Waiting,

    /// Another job already holds the tile; this job completed as a no-op
    AlreadyLoading,
}

/// Loads one tile through the cache and, on a miss, the network.
pub struct TileJob {
    tile: Arc<Tile>,
    key: TileKey,
    url: String,
    host: String,
    context: JobContext,
    executor: DownloadExecutor,
    state: AtomicU8,
    force: AtomicBool,
    submitted_at: Mutex<Option<Instant>>,
}

impl TileJob {
    pub(crate) fn new(tile: Arc<Tile>, context: JobContext, executor: DownloadExecutor) -> Self {
        let key = tile.key();
        let url = tile.url();
        let host = host_key(&url);

        Self {
            tile,
            key,
            url,
            host,
            context,
            executor,
            state: AtomicU8::new(JobState::Created as u8),
            force: AtomicBool::new(false),
            submitted_at: Mutex::new(None),
        }
    }

    pub fn tile(&self) -> &Arc<Tile> {
        &self.tile
    }

    pub fn key(&self) -> &TileKey {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Executor this job was bound to at creation.
    pub fn executor(&self) -> &DownloadExecutor {
        &self.executor
    }

    /// Claim the tile and queue the job on its executor.
    ///
    /// With `force`, the cache lookup is skipped and the tile is always
    /// refetched. Jobs are single-use: a second submission is an error.
    ///
    /// Never suspends: once the tile is claimed the job is already queued,
    /// so no caller can abandon a claim half-way.
    pub fn submit(self: &Arc<Self>, force: bool) -> Result<SubmitOutcome, JobError> {
        self.transition(JobState::Created, JobState::Queued)
            .map_err(|_| JobError::AlreadySubmitted {
                key: self.key.cache_key(),
            })?;

        if !self.tile.try_claim() {
            self.state
                .store(JobState::Completed as u8, Ordering::SeqCst);
            debug!(tile = %self.key, "tile already loading, job skipped");
            return Ok(SubmitOutcome::AlreadyLoading);
        }

        self.force.store(force, Ordering::SeqCst);
        *self.submitted_at.lock() = Some(Instant::now());

        let task: Arc<dyn DownloadTask> = Arc::clone(self) as Arc<dyn DownloadTask>;
        let outcome = match self.executor.execute(task) {
            Admission::Dispatched => SubmitOutcome::Dispatched,
            Admission::Parked => SubmitOutcome::Waiting,
        };
        debug!(tile = %self.key, host = %self.host, ?outcome, force, "job submitted");
        Ok(outcome)
    }

    fn transition(&self, from: JobState, to: JobState) -> Result<(), JobState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(JobState::from_u8)
    }

    /// Cache lookup, then fetch on a miss. Returns whether the cache served
    /// the tile.
    async fn load(&self) -> Result<bool, TileError> {
        let cache_key = self.key.cache_key();

        if !self.force.load(Ordering::SeqCst) {
            if let Some(entry) = self.context.cache.get(&cache_key).await {
                if self.context.freshness.is_fresh(&entry, SystemTime::now()) {
                    match decode(&entry.data, entry.content_type.clone()) {
                        Ok(image) => {
                            self.tile.finish_loading(image);
                            return Ok(true);
                        }
                        Err(e) => {
                            debug!(tile = %self.key, error = %e, "cached tile unreadable, refetching")
                        }
                    }
                } else {
                    debug!(tile = %self.key, "cached tile stale, refetching");
                }
            }
        }

        let network = &self.context.network;
        let request = FetchRequest {
            url: self.url.clone(),
            headers: network.headers.clone(),
            connect_timeout: network.connect_timeout,
            read_timeout: network.read_timeout,
        };
        let deadline = request.deadline();

        let response = tokio::time::timeout(deadline, self.context.fetcher.fetch(&request))
            .await
            .map_err(|_| FetchError::Timeout {
                url: self.url.clone(),
                elapsed: deadline,
            })??;

        let image = decode(&response.data, response.content_type.clone())?;

        let mut entry = CacheEntry::new(response.data).with_expires_at(response.expires_at);
        entry.content_type = response.content_type;
        self.context.cache.put(&cache_key, entry).await;

        self.tile.finish_loading(image);
        Ok(false)
    }

    fn notify(&self, outcome: &LoadOutcome) {
        let listener = &self.context.listener;
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            listener.tile_loading_finished(&self.tile, outcome)
        }));
        if delivered.is_err() {
            warn!(tile = %self.key, "listener panicked while handling tile outcome");
        }
    }
}

#[async_trait]
impl DownloadTask for TileJob {
    fn host(&self) -> &str {
        &self.host
    }

    fn start(&self) -> bool {
        self.transition(JobState::Queued, JobState::Running).is_ok()
    }

    async fn run(&self) {
        let submitted_at = *self.submitted_at.lock();
        let queued_for = submitted_at.map(|t| t.elapsed());
        debug!(tile = %self.key, host = %self.host, ?queued_for, "job started");

        let outcome = match self.load().await {
            Ok(from_cache) => {
                self.state
                    .store(JobState::Completed as u8, Ordering::SeqCst);
                debug!(tile = %self.key, from_cache, "tile loaded");
                LoadOutcome::Loaded { from_cache }
            }
            Err(e) => {
                warn!(tile = %self.key, url = %self.url, error = %e, "tile load failed");
                self.tile.fail(e.to_string());
                self.state.store(JobState::Failed as u8, Ordering::SeqCst);
                LoadOutcome::Failed(e)
            }
        };

        self.notify(&outcome);
    }

    fn cancel(&self) -> bool {
        if self
            .transition(JobState::Queued, JobState::Cancelled)
            .is_err()
        {
            return false;
        }

        self.tile.release();
        debug!(tile = %self.key, "queued job cancelled");
        self.notify(&LoadOutcome::Cancelled);
        true
    }

    fn abort(&self) {
        if self
            .transition(JobState::Running, JobState::Failed)
            .is_err()
        {
            return;
        }

        warn!(tile = %self.key, url = %self.url, "tile job panicked");
        let error = TileError::Panicked;
        self.tile.fail(error.to_string());
        self.notify(&LoadOutcome::Failed(error));
    }
}

impl std::fmt::Debug for TileJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileJob")
            .field("key", &self.key.cache_key())
            .field("host", &self.host)
            .field("state", &self.state())
            .finish()
    }
}

/// Decode an encoded payload, keeping the original bytes.
fn decode(data: &Bytes, content_type: Option<String>) -> Result<TileImage, TileError> {
    let image = image::load_from_memory(data).map_err(|e| TileError::Decode(e.to_string()))?;

    Ok(TileImage {
        data: data.clone(),
        width: image.width(),
        height: image.height(),
        content_type,
    })
}
