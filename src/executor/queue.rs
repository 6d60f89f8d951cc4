//! Two-level admission queue.
//!
//! The pool's workers only ever see the `ready` queue. A task enters it only
//! after its host was under the per-host limit; otherwise the task waits in
//! its host's bucket until a task for the same host finishes. Workers are
//! therefore never parked behind a saturated host.
//!
//! ```text
//!   offer(task) ──► host under limit? ──yes──► ready ──► take() ──► worker
//!                        │                       ▲
//!                        no                      │ promote oldest
//!                        ▼                       │
//!                  bucket.waiting ──── complete(host) ────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{trace, warn};

use super::DownloadTask;
use crate::error::ConfigError;

/// Result of offering a task to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Host was under its limit; the task is ready for a worker
    Dispatched,
    /// Host is saturated; the task waits for a slot on its host
    Parked,
}

/// Per-host admission state.
#[derive(Default)]
struct HostBucket {
    /// Admitted tasks (ready or running)
    in_flight: usize,
    waiting: VecDeque<Arc<dyn DownloadTask>>,
}

impl HostBucket {
    fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.waiting.is_empty()
    }
}

struct QueueState {
    ready: VecDeque<Arc<dyn DownloadTask>>,
    hosts: HashMap<String, HostBucket>,
    workers: usize,
    idle: usize,
}

/// Work queue enforcing a per-host concurrency ceiling in front of a pool.
///
/// State sits behind a synchronous lock that is never held across an await,
/// so admission, completion and draining each happen in one uninterruptible
/// step. Only [`AdmissionQueue::take`] suspends.
pub struct AdmissionQueue {
    host_limit: usize,
    state: Mutex<QueueState>,
    available: Notify,
}

impl AdmissionQueue {
    /// Create a queue admitting at most `host_limit` tasks per host.
    pub fn new(host_limit: usize) -> Result<Self, ConfigError> {
        if host_limit == 0 {
            return Err(ConfigError::InvalidHostLimit(host_limit));
        }

        Ok(Self {
            host_limit,
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                hosts: HashMap::new(),
                workers: 0,
                idle: 0,
            }),
            available: Notify::new(),
        })
    }

    pub fn host_limit(&self) -> usize {
        self.host_limit
    }

    /// Admit a task or park it behind its host.
    pub fn offer(&self, task: Arc<dyn DownloadTask>) -> Admission {
        let host = task.host().to_string();
        let mut state = self.state.lock();
        let bucket = state.hosts.entry(host.clone()).or_default();

        if bucket.in_flight < self.host_limit {
            bucket.in_flight += 1;
            trace!(host = %host, in_flight = bucket.in_flight, "task dispatched");
            state.ready.push_back(task);
            drop(state);
            self.available.notify_one();
            Admission::Dispatched
        } else {
            bucket.waiting.push_back(task);
            trace!(
                host = %host,
                waiting = bucket.waiting.len(),
                "host saturated, task parked"
            );
            Admission::Parked
        }
    }

    /// Wait for a ready task.
    ///
    /// Returns `None` once no task arrived within `keep_alive`; the caller is
    /// then deregistered as a worker and must exit.
    pub async fn take(&self, keep_alive: Duration) -> Option<Arc<dyn DownloadTask>> {
        let deadline = Instant::now() + keep_alive;

        loop {
            let notified = self.available.notified();

            {
                let mut state = self.state.lock();
                if let Some(task) = state.ready.pop_front() {
                    return Some(task);
                }
                if Instant::now() >= deadline {
                    state.workers = state.workers.saturating_sub(1);
                    return None;
                }
                state.idle += 1;
            }

            let _ = tokio::time::timeout_at(deadline, notified).await;

            let mut state = self.state.lock();
            state.idle = state.idle.saturating_sub(1);
        }
    }

    /// Release a finished task's host slot and promote that host's oldest
    /// waiting task, if any.
    ///
    /// Returns `true` if a task was promoted to the ready queue.
    pub fn complete(&self, host: &str) -> bool {
        let mut state = self.state.lock();

        let Some(bucket) = state.hosts.get_mut(host) else {
            warn!(host, "completion reported for unknown host");
            return false;
        };
        bucket.in_flight = bucket.in_flight.saturating_sub(1);

        let promoted = if bucket.in_flight < self.host_limit {
            bucket.waiting.pop_front()
        } else {
            None
        };

        if promoted.is_some() {
            bucket.in_flight += 1;
        }
        if bucket.is_idle() {
            state.hosts.remove(host);
        }

        match promoted {
            Some(task) => {
                trace!(host, "waiting task promoted");
                state.ready.push_back(task);
                drop(state);
                self.available.notify_one();
                true
            }
            None => false,
        }
    }

    /// Remove every task that has not started yet.
    ///
    /// Ready tasks give back their host slot. Each removed task is returned
    /// exactly once; none of them can be handed to a worker afterwards.
    pub fn drain(&self) -> Vec<Arc<dyn DownloadTask>> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let mut drained: Vec<Arc<dyn DownloadTask>> = state.ready.drain(..).collect();
        for task in &drained {
            if let Some(bucket) = state.hosts.get_mut(task.host()) {
                bucket.in_flight = bucket.in_flight.saturating_sub(1);
            }
        }

        for bucket in state.hosts.values_mut() {
            drained.extend(bucket.waiting.drain(..));
        }
        state.hosts.retain(|_, bucket| !bucket.is_idle());

        drained
    }

    /// Register a new worker if ready tasks outnumber idle workers and the
    /// pool has room. Returns `true` if the caller must spawn the worker.
    pub fn reserve_worker(&self, max_workers: usize) -> bool {
        let mut state = self.state.lock();
        if state.ready.len() > state.idle && state.workers < max_workers {
            state.workers += 1;
            true
        } else {
            false
        }
    }

    /// Tasks not yet running, ready or waiting.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.hosts.values().map(|b| b.waiting.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admitted (ready or running) tasks for a host.
    pub fn in_flight(&self, host: &str) -> usize {
        let state = self.state.lock();
        state.hosts.get(host).map(|b| b.in_flight).unwrap_or(0)
    }

    /// Number of hosts currently tracked.
    pub fn host_count(&self) -> usize {
        let state = self.state.lock();
        state.hosts.len()
    }

    /// Registered workers, busy or idle.
    pub fn worker_count(&self) -> usize {
        let state = self.state.lock();
        state.workers
    }
}

// =============================================================================
// Tests
// =============================================================================
