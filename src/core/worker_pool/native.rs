//! Native implementation of `WorkerPool` using OS threads.
//!
//! Workers are spawned from one or more [`ThreadSource`]s (round robin) and block on a
//! bounded crossbeam channel. Each received [`Job`] runs to completion on the worker;
//! panics are caught by the job itself and attributed to its completion path.
//!
//! # Design Principles
//!
//! - **No polling**: Workers block on channel recv
//! - **Clean shutdown**: Dropping the sender unblocks workers once the queue drains
//! - **Bounded wait**: `await_termination` waits on a latch, never on an unbounded join

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::job::Job;

use super::{
    ExitGuard, Lifecycle, PlainThreadSource, PoolCounters, PoolError, PoolState, PoolStats, Team,
    Termination, ThreadSource,
};

/// Worker pool with dedicated OS threads.
///
/// # Design
///
/// - **No polling**: Workers block on channel recv
/// - **Lock-free fast path**: Atomic counters and lifecycle
/// - **Pluggable threads**: The executive supplies affinity-pinning thread sources
pub struct WorkerPool {
    /// Pool name, used in thread names and logs.
    name: String,

    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Where worker threads come from.
    sources: Vec<Arc<dyn ThreadSource>>,

    /// Created / Started / Stopped.
    lifecycle: Lifecycle,

    /// Job sender (to workers). Option allows clean shutdown by dropping.
    job_tx: Mutex<Option<Sender<Job>>>,

    /// Receiver cloned into every worker.
    job_rx: Receiver<Job>,

    /// Pool statistics counters (lock-free atomics).
    counters: Arc<PoolCounters>,

    /// Live worker latch.
    termination: Arc<Termination>,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool fed by plain, unpinned threads.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn new(name: impl Into<String>, config: WorkerPoolConfig) -> Result<Self, PoolError> {
        let source: Arc<dyn ThreadSource> = Arc::new(PlainThreadSource::new(config.thread_stack_size));
        Self::with_thread_sources(name, config, vec![source])
    }

    /// Create a pool whose workers are spawned round robin from `sources`.
    ///
    /// Workers are not spawned until [`WorkerPool::start`].
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid or no thread
    /// source is given.
    pub fn with_thread_sources(
        name: impl Into<String>,
        config: WorkerPoolConfig,
        sources: Vec<Arc<dyn ThreadSource>>,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        if sources.is_empty() {
            return Err(PoolError::InvalidConfig("at least one thread source is required".into()));
        }

        let (job_tx, job_rx) = bounded::<Job>(config.max_queue_depth);
        Ok(Self {
            name: name.into(),
            config,
            sources,
            lifecycle: Lifecycle::new(),
            job_tx: Mutex::new(Some(job_tx)),
            job_rx,
            counters: Arc::new(PoolCounters::default()),
            termination: Arc::new(Termination::default()),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.lifecycle.get()
    }

    /// Spawn the workers and start accepting jobs. Starting twice is a no-op.
    ///
    /// # Errors
    ///
    /// - `PoolError::PoolShutdown` if the pool was already shut down
    /// - `PoolError::Internal` if a worker thread cannot be spawned; the pool is then
    ///   shut down
    pub fn start(&self) -> Result<(), PoolError> {
        match self.lifecycle.start() {
            Ok(()) => {}
            Err(PoolState::Stopped) => return Err(PoolError::PoolShutdown),
            Err(_) => return Ok(()),
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.worker_count {
            let source = &self.sources[worker_id % self.sources.len()];
            match self.spawn_worker(worker_id, source.as_ref()) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    drop(workers);
                    self.shutdown();
                    return Err(err);
                }
            }
        }

        info!(
            pool = %self.name,
            worker_count = self.config.worker_count,
            max_queue_depth = self.config.max_queue_depth,
            "WorkerPool started"
        );
        Ok(())
    }

    /// Submit a job.
    ///
    /// The enqueue operation is non-blocking; it fails immediately if the queue is full.
    ///
    /// # Errors
    ///
    /// - `PoolError::NotStarted` if the pool has not been started
    /// - `PoolError::QueueFull` if the job queue is full
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    pub fn execute(&self, job: Job) -> Result<(), PoolError> {
        if let Some(err) = self.lifecycle.rejection() {
            warn!(pool = %self.name, process = %job.identifier(), error = %err, "job rejected");
            return Err(err);
        }

        let job_tx_guard = self.job_tx.lock();
        let Some(job_tx) = job_tx_guard.as_ref() else {
            return Err(PoolError::PoolShutdown);
        };

        self.counters.queued_jobs.fetch_add(1, Ordering::Relaxed);
        match job_tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                warn!(pool = %self.name, process = %job.identifier(), "worker pool queue is full");
                Err(PoolError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                Err(PoolError::PoolShutdown)
            }
        }
    }

    /// Get current pool statistics. `worker_count` is the number of live workers.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.termination.live())
    }

    /// Stop accepting jobs and let workers exit once the queue drains.
    ///
    /// Does not wait; use [`WorkerPool::await_termination`].
    pub fn shutdown(&self) {
        if !self.lifecycle.stop() {
            return;
        }
        *self.job_tx.lock() = None;
        info!(pool = %self.name, "Shutting down worker pool");
    }

    /// Wait up to `bound` for every worker to exit. Returns whether they all did.
    ///
    /// Workers that do not exit in time are left detached.
    pub fn await_termination(&self, bound: Duration) -> bool {
        if !self.termination.await_all(bound) {
            warn!(
                pool = %self.name,
                live_workers = self.termination.live(),
                timeout_ms = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX),
                "worker pool did not terminate within bound"
            );
            return false;
        }

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.join().is_err() {
                warn!(pool = %self.name, worker_id = idx, "Worker panicked");
            }
        }
        info!(pool = %self.name, worker_count, "Worker pool shut down complete");
        true
    }

    fn spawn_worker(&self, worker_id: usize, source: &dyn ThreadSource) -> Result<JoinHandle<()>, PoolError> {
        let name = format!("{}-{worker_id}", self.name);
        let pool = self.name.clone();
        let job_rx = self.job_rx.clone();
        let counters = Arc::clone(&self.counters);
        let termination = Arc::clone(&self.termination);

        self.termination.register();
        let body = Box::new(move || {
            let _exit = ExitGuard(&termination);
            debug!(pool = %pool, worker_id, "Worker thread started");

            // When the sender is dropped and the queue drained, recv returns Err
            while let Ok(job) = job_rx.recv() {
                counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                counters.active_jobs.fetch_add(1, Ordering::Relaxed);
                debug!(pool = %pool, worker_id, process = %job.identifier(), "Worker executing job");

                let succeeded = job.run();

                counters.active_jobs.fetch_sub(1, Ordering::Relaxed);
                if succeeded {
                    counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.failed_jobs.fetch_add(1, Ordering::Relaxed);
                }
            }

            debug!(pool = %pool, worker_id, "Worker thread exiting");
        });

        source.spawn_thread(name, body).map_err(|err| {
            self.termination.exited();
            PoolError::Internal(format!("failed to spawn worker {worker_id}: {err}"))
        })
    }
}

impl Team for WorkerPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_working(&self) -> Result<(), PoolError> {
        self.start()
    }

    fn assign_job(&self, job: Job) -> Result<(), PoolError> {
        self.execute(job)
    }

    fn stop_working(&self) {
        self.shutdown();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join workers in Drop
        if self.lifecycle.stop() {
            *self.job_tx.lock() = None;
            debug!(pool = %self.name, "WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}
