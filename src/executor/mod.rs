//! Bounded download pool with per-host admission.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     DownloadExecutor                      │
//! │  execute(task) ─► AdmissionQueue ─► ready ─► worker tasks │
//! │                   (per-host limit)         (pool limit)   │
//! │                                                           │
//! │  submitted / finished counters, cancel_queued()           │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`DownloadExecutor`]: Lazily spawned worker pool that retires idle workers
//! - [`AdmissionQueue`]: Per-host gate in front of the pool's ready queue
//! - [`DownloadTask`]: What the pool runs; implemented by tile jobs

mod pool;
mod queue;

use async_trait::async_trait;

pub use pool::{
    DownloadExecutor, ExecutorConfig, DEFAULT_HOST_LIMIT, DEFAULT_KEEP_ALIVE, DEFAULT_WORKER_LIMIT,
};
pub use queue::{Admission, AdmissionQueue};

/// A unit of work the download pool can queue, run and cancel.
///
/// `start` and `cancel` race for the same queued state; exactly one of them
/// may succeed for a given task.
#[async_trait]
pub trait DownloadTask: Send + Sync + 'static {
    /// Host key used for per-host admission.
    fn host(&self) -> &str;

    /// Move the task from queued to running.
    ///
    /// Returns `false` if the task was cancelled; it must then not run.
    fn start(&self) -> bool;

    /// Execute the task. Only called after a successful `start`.
    async fn run(&self);

    /// Roll back a task that never started.
    ///
    /// Returns `false` if the task had already left the queued state.
    fn cancel(&self) -> bool;

    /// Settle a task whose `run` panicked or was torn down before returning.
    ///
    /// Called by the worker in place of a normal finish.
    fn abort(&self) {}
}
