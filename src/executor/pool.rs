use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::queue::{Admission, AdmissionQueue};
use super::DownloadTask;
use crate::error::ConfigError;

/// Default maximum number of concurrent download workers.
pub const DEFAULT_WORKER_LIMIT: usize = 25;

/// Default maximum number of concurrent downloads per host.
pub const DEFAULT_HOST_LIMIT: usize = 6;

/// Idle workers retire after this long without work.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(300);

// =============================================================================
// Configuration
// =============================================================================

/// Construction parameters for a [`DownloadExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Prefix for worker names in logs
    pub name: String,

    /// Pool size: total concurrently running tasks
    pub max_workers: usize,

    /// Concurrently admitted tasks per host
    pub host_limit: usize,

    /// How long an idle worker waits for work before retiring
    pub keep_alive: Duration,
}

impl ExecutorConfig {
    /// Create a configuration with default limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_workers: DEFAULT_WORKER_LIMIT,
            host_limit: DEFAULT_HOST_LIMIT,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_host_limit(mut self, host_limit: usize) -> Self {
        self.host_limit = host_limit;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Validate the limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidWorkerLimit(self.max_workers));
        }
        if self.host_limit == 0 {
            return Err(ConfigError::InvalidHostLimit(self.host_limit));
        }
        Ok(())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new("tile-downloader")
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Bounded pool of download workers behind an [`AdmissionQueue`].
///
/// Workers are tokio tasks spawned on demand up to `max_workers` and retired
/// after `keep_alive` without work, so an unused executor holds no tasks.
/// Cloning yields another handle to the same pool.
///
/// Each call to [`DownloadExecutor::new`] creates an independent pool;
/// loaders that should share capacity must share a handle.
#[derive(Clone)]
pub struct DownloadExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    config: ExecutorConfig,
    queue: AdmissionQueue,

    /// Tasks handed to `execute`
    submitted: AtomicU64,

    /// Tasks that ran to completion or were cancelled
    finished: AtomicU64,

    running: AtomicUsize,
    next_worker_id: AtomicUsize,
}

impl DownloadExecutor {
    /// Create a new, empty pool.
    pub fn new(config: ExecutorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let queue = AdmissionQueue::new(config.host_limit)?;

        Ok(Self {
            inner: Arc::new(ExecutorInner {
                config,
                queue,
                submitted: AtomicU64::new(0),
                finished: AtomicU64::new(0),
                running: AtomicUsize::new(0),
                next_worker_id: AtomicUsize::new(0),
            }),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Queue a task for execution.
    ///
    /// Counting, admission and worker spawning happen without suspending, so
    /// a task handed to `execute` is always either queued with a worker to
    /// run it or already running. Must be called from within a tokio
    /// runtime; workers are spawned on it.
    pub fn execute(&self, task: Arc<dyn DownloadTask>) -> Admission {
        self.inner.submitted.fetch_add(1, Ordering::SeqCst);
        let admission = self.inner.queue.offer(task);
        if admission == Admission::Dispatched {
            self.inner.spawn_workers();
        }
        admission
    }

    /// Remove all queued tasks and roll each of them back.
    ///
    /// Running tasks are left to finish. Returns the number of tasks rolled
    /// back.
    pub fn cancel_queued(&self) -> usize {
        let drained = self.inner.queue.drain();
        let mut cancelled = 0;

        for task in drained {
            if task.cancel() {
                cancelled += 1;
            }
            self.inner.finished.fetch_add(1, Ordering::SeqCst);
        }

        if cancelled > 0 {
            info!(executor = %self.inner.config.name, cancelled, "cancelled queued tasks");
        }
        cancelled
    }

    /// Total tasks ever submitted.
    pub fn task_count(&self) -> u64 {
        self.inner.submitted.load(Ordering::SeqCst)
    }

    /// Tasks that completed or were cancelled.
    pub fn completed_task_count(&self) -> u64 {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// `true` while any submitted task is queued or running.
    pub fn has_outstanding_tasks(&self) -> bool {
        self.task_count() > self.completed_task_count()
    }

    /// Tasks currently running on a worker.
    pub fn active_count(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Tasks waiting to run, admitted or parked.
    pub fn queued_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// Live workers, busy or idle.
    pub fn worker_count(&self) -> usize {
        self.inner.queue.worker_count()
    }

    /// Admitted tasks (ready or running) for a host.
    pub fn in_flight(&self, host: &str) -> usize {
        self.inner.queue.in_flight(host)
    }

    /// `true` if both handles refer to the same pool.
    pub fn same_pool(&self, other: &DownloadExecutor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for DownloadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadExecutor")
            .field("config", &self.inner.config)
            .field("submitted", &self.task_count())
            .field("finished", &self.completed_task_count())
            .finish()
    }
}

impl ExecutorInner {
    fn spawn_workers(self: &Arc<Self>) {
        while self.queue.reserve_worker(self.config.max_workers) {
            let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
            let inner = Arc::clone(self);
            tokio::spawn(inner.worker_loop(id));
        }
    }

    // Promoted tasks are picked up by this loop's next `take`, so workers
    // never need to spawn siblings.
    async fn worker_loop(self: Arc<Self>, id: usize) {
        let worker = format!("{}-{}", self.config.name, id);
        debug!(worker = %worker, "worker started");

        while let Some(task) = self.queue.take(self.config.keep_alive).await {
            if task.start() {
                self.running.fetch_add(1, Ordering::SeqCst);

                // Run on its own task so a panic cannot take the worker down
                // with the host slot still held.
                let running = Arc::clone(&task);
                if let Err(e) = tokio::spawn(async move { running.run().await }).await {
                    error!(worker = %worker, host = task.host(), error = %e, "task panicked");
                    task.abort();
                }

                self.running.fetch_sub(1, Ordering::SeqCst);
            } else {
                debug!(worker = %worker, host = task.host(), "skipping cancelled task");
            }

            self.queue.complete(task.host());
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        debug!(worker = %worker, "worker retired");
    }
}

// =============================================================================
// Tests
// =============================================================================
