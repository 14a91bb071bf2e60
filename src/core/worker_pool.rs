//! Worker pools (teams) that run dispatched jobs on dedicated OS threads.
//!
//! This module defines the [`Team`] contract shared by every pool, the thread sources
//! workers are spawned from, and the native [`WorkerPool`] implementation. The
//! executive builds one pool per CPU core from affinity-bound thread factories; callers
//! opting out of oversight get a plain pool fed by unpinned threads.
//!
//! # Lifecycle
//!
//! `Created -> Started (start_working) -> accepting jobs -> Stopped (stop_working)`.
//! A pool that is not started, or has been stopped, rejects jobs. Jobs accepted before
//! stopping still run to completion.

mod native;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::job::Job;

/// Errors that can occur when using a worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The job queue is full; no more jobs can be accepted.
    QueueFull,

    /// The pool has not been started.
    NotStarted,

    /// The pool has been shut down.
    PoolShutdown,

    /// A job is bound to a core the executive does not manage.
    UnknownCore {
        /// Core requested by the job's process identifier.
        core: usize,
        /// Number of cores managed.
        cores: usize,
    },

    /// The operation timed out.
    Timeout,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (thread spawn failure, channel closed, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "job queue is full"),
            Self::NotStarted => write!(f, "pool has not been started"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::UnknownCore { core, cores } => {
                write!(f, "no pool for core {core}: {cores} cores managed")
            }
            Self::Timeout => write!(f, "operation timed out"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// A pool of workers that accepts jobs.
pub trait Team: Send + Sync {
    /// Team name.
    fn name(&self) -> &str;

    /// Start accepting jobs.
    ///
    /// # Errors
    ///
    /// Fails if the team was stopped or its workers cannot be spawned.
    fn start_working(&self) -> Result<(), PoolError>;

    /// Hand a job to the team.
    ///
    /// # Errors
    ///
    /// - `PoolError::NotStarted` / `PoolError::PoolShutdown` outside the started state
    /// - `PoolError::QueueFull` if the queue is at capacity
    /// - `PoolError::UnknownCore` if the job's affinity has no pool
    fn assign_job(&self, job: Job) -> Result<(), PoolError>;

    /// Stop accepting jobs. Idempotent.
    fn stop_working(&self);
}

/// Spawns the OS threads workers run on.
pub trait ThreadSource: Send + Sync {
    /// Spawn a named thread running `body`.
    ///
    /// # Errors
    ///
    /// Propagates the OS error if the thread cannot be created.
    fn spawn_thread(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>;
}

/// Plain threads with no affinity binding.
#[derive(Debug, Clone)]
pub struct PlainThreadSource {
    stack_size: usize,
}

impl PlainThreadSource {
    /// Threads with the given stack size.
    #[must_use]
    pub const fn new(stack_size: usize) -> Self {
        Self { stack_size }
    }
}

impl ThreadSource for PlainThreadSource {
    fn spawn_thread(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name)
            .stack_size(self.stack_size)
            .spawn(body)
    }
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Currently executing jobs.
    pub active_jobs: u64,

    /// Jobs waiting in the queue.
    pub queued_jobs: u64,

    /// Total jobs completed successfully.
    pub completed_jobs: u64,

    /// Total jobs that failed or panicked.
    pub failed_jobs: u64,

    /// Total jobs accepted.
    pub submitted_jobs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_jobs: AtomicU64,
    pub queued_jobs: AtomicU64,
    pub completed_jobs: AtomicU64,
    pub failed_jobs: AtomicU64,
    pub submitted_jobs: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
        }
    }
}

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Built, workers not yet running.
    Created,
    /// Accepting jobs.
    Started,
    /// No longer accepting jobs.
    Stopped,
}

/// Atomic cell holding a [`PoolState`].
#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    const CREATED: u8 = 0;
    const STARTED: u8 = 1;
    const STOPPED: u8 = 2;

    pub const fn new() -> Self {
        Self(AtomicU8::new(Self::CREATED))
    }

    pub fn get(&self) -> PoolState {
        match self.0.load(Ordering::Acquire) {
            Self::CREATED => PoolState::Created,
            Self::STARTED => PoolState::Started,
            _ => PoolState::Stopped,
        }
    }

    /// Created -> Started. Returns the state observed if the transition did not happen.
    pub fn start(&self) -> Result<(), PoolState> {
        self.0
            .compare_exchange(Self::CREATED, Self::STARTED, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| self.get())
    }

    /// Any -> Stopped. Returns whether this call performed the transition.
    pub fn stop(&self) -> bool {
        self.0.swap(Self::STOPPED, Ordering::AcqRel) != Self::STOPPED
    }

    /// Error for a job offered outside the started state.
    pub fn rejection(&self) -> Option<PoolError> {
        match self.get() {
            PoolState::Started => None,
            PoolState::Created => Some(PoolError::NotStarted),
            PoolState::Stopped => Some(PoolError::PoolShutdown),
        }
    }
}

/// Counts live worker threads so shutdown can await their exit with a bound.
#[derive(Debug, Default)]
pub(crate) struct Termination {
    live: Mutex<usize>,
    exited: Condvar,
}

impl Termination {
    pub fn register(&self) {
        *self.live.lock() += 1;
    }

    pub fn exited(&self) {
        let mut live = self.live.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.exited.notify_all();
        }
    }

    pub fn live(&self) -> usize {
        *self.live.lock()
    }

    /// Wait until every registered thread has exited or `bound` elapses.
    pub fn await_all(&self, bound: Duration) -> bool {
        let deadline = Instant::now() + bound;
        let mut live = self.live.lock();
        while *live > 0 {
            if self.exited.wait_until(&mut live, deadline).timed_out() {
                return *live == 0;
            }
        }
        true
    }
}

/// Marks a worker as exited when its thread unwinds or returns.
pub(crate) struct ExitGuard<'a>(pub &'a Termination);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.exited();
    }
}

pub use native::WorkerPool;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::QueueFull;
        assert_eq!(format!("{}", err), "job queue is full");

        let err = PoolError::UnknownCore { core: 7, cores: 2 };
        assert_eq!(format!("{}", err), "no pool for core 7: 2 cores managed");

        let err = PoolError::Timeout;
        assert_eq!(format!("{}", err), "operation timed out");
    }

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();
        assert_eq!(stats.worker_count, 0);
        assert_eq!(stats.active_jobs, 0);
        assert_eq!(stats.completed_jobs, 0);
    }

    #[test]
    fn test_pool_counters_snapshot() {
        let counters = PoolCounters::default();
        counters.submitted_jobs.fetch_add(10, Ordering::Relaxed);
        counters.completed_jobs.fetch_add(5, Ordering::Relaxed);

        let stats = counters.snapshot(4);
        assert_eq!(stats.worker_count, 4);
        assert_eq!(stats.submitted_jobs, 10);
        assert_eq!(stats.completed_jobs, 5);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.rejection(), Some(PoolError::NotStarted));
        assert!(lifecycle.start().is_ok());
        assert_eq!(lifecycle.start(), Err(PoolState::Started));
        assert_eq!(lifecycle.rejection(), None);
        assert!(lifecycle.stop());
        assert!(!lifecycle.stop());
        assert_eq!(lifecycle.start(), Err(PoolState::Stopped));
        assert_eq!(lifecycle.rejection(), Some(PoolError::PoolShutdown));
    }

    #[test]
    fn test_termination_times_out_with_live_worker() {
        let termination = Arc::new(Termination::default());
        termination.register();
        assert!(!termination.await_all(Duration::from_millis(20)));

        let remote = Arc::clone(&termination);
        let handle = thread::spawn(move || {
            let _guard = ExitGuard(&remote);
        });
        handle.join().unwrap();
        assert!(termination.await_all(Duration::from_millis(20)));
        assert_eq!(termination.live(), 0);
    }
}
