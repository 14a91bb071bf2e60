//! Single-threaded delayed-task pool, one per core.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::job::panic_message;
use crate::core::worker_pool::{ExitGuard, Lifecycle, PoolError, Termination, ThreadSource};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Scheduled {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: the heap pops the earliest deadline, FIFO among equal deadlines.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Runs delayed tasks on one dedicated thread.
///
/// Tasks still waiting for their deadline at shutdown are dropped.
pub struct ScheduledPool {
    name: String,
    lifecycle: Lifecycle,
    task_tx: Mutex<Option<Sender<Scheduled>>>,
    seq: AtomicU64,
    termination: Arc<Termination>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledPool {
    /// Spawn the pool's thread from `source` and start accepting tasks.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Internal` if the thread cannot be spawned.
    pub fn start(name: impl Into<String>, source: &dyn ThreadSource) -> Result<Self, PoolError> {
        let name = name.into();
        let (task_tx, task_rx) = unbounded();
        let termination = Arc::new(Termination::default());

        termination.register();
        let body = {
            let name = name.clone();
            let termination = Arc::clone(&termination);
            Box::new(move || {
                let _exit = ExitGuard(&termination);
                run_timer_loop(&name, &task_rx);
            })
        };
        let worker = source.spawn_thread(name.clone(), body).map_err(|err| {
            termination.exited();
            PoolError::Internal(format!("failed to spawn scheduler `{name}`: {err}"))
        })?;

        let lifecycle = Lifecycle::new();
        // A fresh lifecycle always starts
        let _ = lifecycle.start();
        debug!(pool = %name, "scheduled pool started");

        Ok(Self {
            name,
            lifecycle,
            task_tx: Mutex::new(Some(task_tx)),
            seq: AtomicU64::new(0),
            termination,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `task` on the pool's thread once `delay` has elapsed.
    ///
    /// # Errors
    ///
    /// - `PoolError::PoolShutdown` once the pool has been shut down
    /// - `PoolError::InvalidConfig` if `delay` reaches past the clock's range
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(err) = self.lifecycle.rejection() {
            return Err(err);
        }
        let due = Instant::now()
            .checked_add(delay)
            .ok_or_else(|| PoolError::InvalidConfig(format!("delay {delay:?} is out of range")))?;
        let scheduled = Scheduled {
            due,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            task: Box::new(task),
        };
        let guard = self.task_tx.lock();
        let task_tx = guard.as_ref().ok_or(PoolError::PoolShutdown)?;
        task_tx.send(scheduled).map_err(|_| PoolError::PoolShutdown)
    }

    /// Stop accepting tasks; the thread exits promptly, dropping pending tasks.
    pub fn shutdown(&self) {
        if self.lifecycle.stop() {
            *self.task_tx.lock() = None;
            info!(pool = %self.name, "Shutting down scheduled pool");
        }
    }

    /// Wait up to `bound` for the pool's thread to exit. Returns whether it did.
    pub fn await_termination(&self, bound: Duration) -> bool {
        if !self.termination.await_all(bound) {
            warn!(pool = %self.name, "scheduled pool did not terminate within bound");
            return false;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!(pool = %self.name, "scheduler thread panicked");
            }
        }
        true
    }
}

impl Drop for ScheduledPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ScheduledPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledPool")
            .field("name", &self.name)
            .field("state", &self.lifecycle.get())
            .finish_non_exhaustive()
    }
}

fn run_timer_loop(name: &str, task_rx: &Receiver<Scheduled>) {
    let mut pending: BinaryHeap<Scheduled> = BinaryHeap::new();
    loop {
        let received = match pending.peek() {
            Some(next) => task_rx.recv_deadline(next.due),
            None => task_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(scheduled) => pending.push(scheduled),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        while pending.peek().is_some_and(|next| next.due <= now) {
            if let Some(scheduled) = pending.pop() {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(scheduled.task)) {
                    error!(pool = %name, panic = %panic_message(payload.as_ref()), "scheduled task panicked");
                }
            }
        }
    }

    if !pending.is_empty() {
        debug!(pool = %name, dropped = pending.len(), "scheduled tasks dropped at shutdown");
    }
}
