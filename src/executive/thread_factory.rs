//! Thread factories: one per logical CPU, pinning every thread they create.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::core::job::CoreAffinity;
use crate::core::worker_pool::ThreadSource;
use crate::executive::affinity::{set_current_affinity, AffinityBinder, CpuMask};
use crate::executive::topology::LogicalCpu;

/// Creates OS threads bound to one logical CPU.
///
/// Every thread runs an on-start hook before its body: it pins itself to the factory's
/// CPU (failures are logged, never fatal) and records the [`CoreAffinity`] it serves,
/// which [`current_affinity`](crate::executive::current_affinity) then reports.
pub struct ThreadFactory {
    core: CoreAffinity,
    cpu: LogicalCpu,
    stack_size: usize,
    pin: bool,
    binder: Arc<dyn AffinityBinder>,
    spawned: AtomicUsize,
}

impl ThreadFactory {
    /// Factory for threads on `cpu`, serving `core`.
    #[must_use]
    pub fn new(
        core: CoreAffinity,
        cpu: LogicalCpu,
        stack_size: usize,
        pin: bool,
        binder: Arc<dyn AffinityBinder>,
    ) -> Self {
        Self {
            core,
            cpu,
            stack_size,
            pin,
            binder,
            spawned: AtomicUsize::new(0),
        }
    }

    /// Core served by threads of this factory.
    #[must_use]
    pub const fn core(&self) -> CoreAffinity {
        self.core
    }

    /// Logical CPU threads are pinned to.
    #[must_use]
    pub const fn cpu(&self) -> LogicalCpu {
        self.cpu
    }

    /// Number of threads created so far.
    #[must_use]
    pub fn threads_spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    fn on_thread_start(core: CoreAffinity, cpu: LogicalCpu, pin: bool, binder: &dyn AffinityBinder) {
        if pin {
            match binder.bind_current_thread(&CpuMask::single(cpu.id())) {
                Ok(()) => debug!(%core, %cpu, "thread pinned"),
                Err(err) => warn!(%core, %cpu, error = %err, "thread affinity not applied"),
            }
        }
        set_current_affinity(core);
    }
}

impl ThreadSource for ThreadFactory {
    fn spawn_thread(&self, name: String, body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
        let (core, cpu, pin) = (self.core, self.cpu, self.pin);
        let binder = Arc::clone(&self.binder);
        let handle = thread::Builder::new()
            .name(name)
            .stack_size(self.stack_size)
            .spawn(move || {
                Self::on_thread_start(core, cpu, pin, binder.as_ref());
                body();
            })?;
        self.spawned.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }
}

impl std::fmt::Debug for ThreadFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadFactory")
            .field("core", &self.core)
            .field("cpu", &self.cpu)
            .field("pin", &self.pin)
            .field("spawned", &self.threads_spawned())
            .finish_non_exhaustive()
    }
}

/// A named set of thread factories.
#[derive(Debug, Clone)]
pub struct ExecutionStrategy {
    name: String,
    factories: Vec<Arc<ThreadFactory>>,
}

impl ExecutionStrategy {
    pub(crate) fn new(name: impl Into<String>, factories: Vec<Arc<ThreadFactory>>) -> Self {
        Self {
            name: name.into(),
            factories,
        }
    }

    /// Strategy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thread factories of the strategy.
    #[must_use]
    pub fn factories(&self) -> &[Arc<ThreadFactory>] {
        &self.factories
    }
}
