//! The executive: per-core worker pools, scheduled pools, and process identifiers.
//!
//! At startup one [`ThreadFactory`] is created per logical CPU. Factories are grouped by
//! physical core, and each core gets one worker pool and one single-threaded scheduled
//! pool. Process identifiers are minted round robin over the cores, so every job of a
//! process runs on the same core.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use prometheus_kernel::config::ExecutiveConfig;
//! use prometheus_kernel::core::job::Job;
//! use prometheus_kernel::executive::{CpuTopology, Executive, OsAffinityBinder, TeamOversight};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let executive = Executive::new(ExecutiveConfig::default(), CpuTopology::discover(), Arc::new(OsAffinityBinder))?;
//! let team = executive.create_team("app", TeamOversight::Affinity)?;
//! team.start_working()?;
//!
//! let identifier = executive.create_process_identifier();
//! team.assign_job(Job::new(identifier, || Ok(())))?;
//!
//! let report = executive.stop_managing();
//! assert!(report.all_terminated());
//! # Ok(())
//! # }
//! ```

pub mod affinity;
pub mod scheduled;
pub mod team;
pub mod thread_factory;
pub mod topology;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ExecutiveConfig, WorkerPoolConfig};
use crate::core::error::KernelError;
use crate::core::job::{CoreAffinity, ProcessIdentifier};
use crate::core::worker_pool::{PoolError, Team, ThreadSource, WorkerPool};

pub use affinity::{current_affinity, AffinityBinder, AffinityError, CpuMask, NoopBinder, OsAffinityBinder};
pub use scheduled::ScheduledPool;
pub use team::AffinityTeam;
pub use thread_factory::{ExecutionStrategy, ThreadFactory};
pub use topology::{CpuCore, CpuTopology, LogicalCpu};

/// Whether a team's jobs are routed to per-core pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamOversight {
    /// Route by core affinity over the executive's per-core pools.
    Affinity,
    /// A plain pool of unpinned threads; affinity is ignored.
    None,
}

/// Termination outcome of one pool during [`Executive::stop_managing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTermination {
    /// Pool name.
    pub pool: String,
    /// Whether the pool's threads exited within the bound.
    pub terminated: bool,
}

/// Outcome of [`Executive::stop_managing`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// One entry per pool, per-core worker pools first.
    pub pools: Vec<PoolTermination>,
}

impl ShutdownReport {
    /// Whether every pool terminated in time.
    #[must_use]
    pub fn all_terminated(&self) -> bool {
        self.pools.iter().all(|pool| pool.terminated)
    }

    /// Names of pools that did not terminate in time.
    pub fn timed_out(&self) -> impl Iterator<Item = &str> {
        self.pools
            .iter()
            .filter(|pool| !pool.terminated)
            .map(|pool| pool.pool.as_str())
    }
}

/// Owns the machine's worker threads and decides which core runs which job.
pub struct Executive {
    config: ExecutiveConfig,
    topology: CpuTopology,
    binder: Arc<dyn AffinityBinder>,
    factories: Vec<Vec<Arc<ThreadFactory>>>,
    core_pools: Vec<Arc<WorkerPool>>,
    scheduled: Vec<ScheduledPool>,
    unmanaged: Mutex<Vec<Arc<WorkerPool>>>,
    next_core: AtomicUsize,
}

impl Executive {
    /// Build thread factories, per-core worker pools, and per-core scheduled pools.
    ///
    /// Worker pools start when a team over them starts working; scheduled pools start
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Configuration`] for an invalid configuration and
    /// [`KernelError::Pool`] if a scheduler thread cannot be spawned.
    pub fn new(
        config: ExecutiveConfig,
        topology: CpuTopology,
        binder: Arc<dyn AffinityBinder>,
    ) -> Result<Self, KernelError> {
        config.validate().map_err(KernelError::Configuration)?;

        let prefix = config.thread_name_prefix.clone();
        let mut factories = Vec::with_capacity(topology.core_count());
        let mut core_pools = Vec::with_capacity(topology.core_count());
        let mut scheduled = Vec::with_capacity(topology.core_count());

        for core in topology.cores() {
            let affinity = CoreAffinity::new(core.index());
            let core_factories: Vec<Arc<ThreadFactory>> = core
                .logical_cpus()
                .iter()
                .map(|&cpu| {
                    Arc::new(ThreadFactory::new(
                        affinity,
                        cpu,
                        config.thread_stack_size,
                        config.pin_threads,
                        Arc::clone(&binder),
                    ))
                })
                .collect();

            let sources: Vec<Arc<dyn ThreadSource>> = core_factories
                .iter()
                .map(|factory| Arc::clone(factory) as Arc<dyn ThreadSource>)
                .collect();
            let pool = WorkerPool::with_thread_sources(
                format!("{prefix}-core{}", core.index()),
                config.core_pool(core.logical_cpus().len()),
                sources,
            )?;
            core_pools.push(Arc::new(pool));

            let first = core_factories
                .first()
                .ok_or_else(|| KernelError::Configuration(format!("core {} has no logical cpus", core.index())))?;
            scheduled.push(ScheduledPool::start(
                format!("{prefix}-sched{}", core.index()),
                first.as_ref(),
            )?);

            factories.push(core_factories);
        }

        info!(
            cores = topology.core_count(),
            logical_cpus = topology.logical_cpu_count(),
            threads_per_cpu = config.threads_per_cpu,
            pin_threads = config.pin_threads,
            "executive started"
        );

        Ok(Self {
            config,
            topology,
            binder,
            factories,
            core_pools,
            scheduled,
            unmanaged: Mutex::new(Vec::new()),
            next_core: AtomicUsize::new(0),
        })
    }

    /// The managed topology.
    #[must_use]
    pub const fn topology(&self) -> &CpuTopology {
        &self.topology
    }

    /// Number of managed cores.
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.topology.core_count()
    }

    /// Number of thread factories (one per logical CPU).
    #[must_use]
    pub fn thread_factory_count(&self) -> usize {
        self.factories.iter().map(Vec::len).sum()
    }

    /// Mint a process identifier.
    ///
    /// A thread already serving a core (a worker, or a thread that minted an identifier
    /// before) reuses that core. Otherwise the next core in round-robin order is chosen,
    /// the calling thread is bound to that core's CPUs, and the choice is remembered
    /// for the thread.
    pub fn create_process_identifier(&self) -> ProcessIdentifier {
        let core_count = self.core_count();
        if let Some(affinity) = current_affinity().filter(|affinity| affinity.index() < core_count) {
            return ProcessIdentifier::new(affinity);
        }

        let index = self.next_core.fetch_add(1, Ordering::Relaxed) % core_count;
        let affinity = CoreAffinity::new(index);
        if self.config.pin_threads {
            if let Some(core) = self.topology.core(index) {
                if let Err(err) = self.binder.bind_current_thread(&core.mask()) {
                    warn!(core = index, error = %err, "calling thread not bound to core");
                }
            }
        }
        affinity::set_current_affinity(affinity);

        let identifier = ProcessIdentifier::new(affinity);
        debug!(process = %identifier, "process identifier created");
        identifier
    }

    /// Named sets of thread factories: one strategy holding every factory.
    #[must_use]
    pub fn execution_strategies(&self) -> Vec<ExecutionStrategy> {
        let all = self.factories.iter().flatten().cloned().collect();
        vec![ExecutionStrategy::new(self.config.strategy_name.clone(), all)]
    }

    /// Create a team.
    ///
    /// [`TeamOversight::Affinity`] teams share the executive's per-core pools.
    /// [`TeamOversight::None`] teams get their own pool of unpinned threads sized to
    /// the logical CPU count.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Pool`] if the plain pool's configuration is invalid.
    pub fn create_team(&self, name: &str, oversight: TeamOversight) -> Result<Arc<dyn Team>, KernelError> {
        match oversight {
            TeamOversight::Affinity => Ok(Arc::new(AffinityTeam::new(name, self.core_pools.clone()))),
            TeamOversight::None => {
                let config = WorkerPoolConfig::new()
                    .with_worker_count(self.topology.logical_cpu_count() * self.config.threads_per_cpu)
                    .with_max_queue_depth(self.config.max_queue_depth)
                    .with_thread_stack_size(self.config.thread_stack_size);
                let pool = Arc::new(WorkerPool::new(name, config)?);
                self.unmanaged.lock().push(Arc::clone(&pool));
                info!(team = %name, "unmanaged team created");
                Ok(pool)
            }
        }
    }

    /// Run `task` after `delay` on the scheduled pool of the identifier's core.
    ///
    /// # Errors
    ///
    /// - [`PoolError::UnknownCore`] if the identifier's core is not managed
    /// - [`PoolError::PoolShutdown`] after [`Executive::stop_managing`]
    /// - [`PoolError::InvalidConfig`] if `delay` cannot be represented as a deadline
    pub fn schedule<F>(&self, identifier: &ProcessIdentifier, delay: Duration, task: F) -> Result<(), KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        let core = identifier.affinity().index();
        let pool = self.scheduled.get(core).ok_or(PoolError::UnknownCore {
            core,
            cores: self.scheduled.len(),
        })?;
        pool.schedule(delay, task)?;
        Ok(())
    }

    /// Scheduler for work with no process affinity; always core 0.
    #[must_use]
    pub fn background_scheduler(&self) -> &ScheduledPool {
        // The topology guarantees at least one core.
        &self.scheduled[0]
    }

    /// Shut down every pool and await each with the configured bound.
    ///
    /// Pools that do not terminate in time are logged and reported; the rest are still
    /// shut down and awaited.
    pub fn stop_managing(&self) -> ShutdownReport {
        let unmanaged: Vec<Arc<WorkerPool>> = self.unmanaged.lock().clone();
        let worker_pools: Vec<&Arc<WorkerPool>> = self.core_pools.iter().chain(unmanaged.iter()).collect();

        for pool in &worker_pools {
            pool.shutdown();
        }
        for pool in &self.scheduled {
            pool.shutdown();
        }

        let bound = self.config.shutdown_timeout();
        let mut report = ShutdownReport::default();
        for pool in worker_pools {
            report.pools.push(PoolTermination {
                pool: pool.name().to_owned(),
                terminated: pool.await_termination(bound),
            });
        }
        for pool in &self.scheduled {
            report.pools.push(PoolTermination {
                pool: pool.name().to_owned(),
                terminated: pool.await_termination(bound),
            });
        }

        let timed_out: Vec<&str> = report.timed_out().collect();
        if timed_out.is_empty() {
            info!(pools = report.pools.len(), "executive stopped");
        } else {
            warn!(pools = report.pools.len(), timed_out = ?timed_out, "executive stopped with pools still running");
        }
        report
    }
}

impl std::fmt::Debug for Executive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executive")
            .field("cores", &self.core_count())
            .field("thread_factories", &self.thread_factory_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::Job;
    use crate::executive::affinity::testing::RecordingBinder;
    use std::sync::mpsc;
    use std::thread;

    fn config() -> ExecutiveConfig {
        ExecutiveConfig {
            thread_stack_size: 256 * 1024,
            shutdown_timeout_ms: 2_000,
            ..ExecutiveConfig::default()
        }
    }

    fn executive(layout: Vec<Vec<usize>>) -> (Executive, Arc<RecordingBinder>) {
        let binder = Arc::new(RecordingBinder::default());
        let topology = CpuTopology::from_core_layout(layout).unwrap();
        (Executive::new(config(), topology, binder.clone()).unwrap(), binder)
    }

    #[test]
    fn test_one_factory_per_logical_cpu() {
        let (executive, _binder) = executive(vec![vec![0, 2], vec![1, 3], vec![4]]);
        assert_eq!(executive.core_count(), 3);
        assert_eq!(executive.thread_factory_count(), 5);

        let strategies = executive.execution_strategies();
        assert_eq!(strategies.len(), 1);
        assert_eq!(strategies[0].name(), "core-affinity");
        assert_eq!(strategies[0].factories().len(), 5);
        assert!(executive.stop_managing().all_terminated());
    }

    #[test]
    fn test_identifiers_round_robin_across_fresh_threads() {
        let (executive, binder) = executive(vec![vec![0], vec![1]]);
        let executive = Arc::new(executive);

        let cores: Vec<usize> = (0..4)
            .map(|_| {
                let executive = Arc::clone(&executive);
                thread::spawn(move || executive.create_process_identifier().affinity().index())
                    .join()
                    .unwrap()
            })
            .collect();
        assert_eq!(cores, [0, 1, 0, 1]);
        // Scheduler threads pin themselves too; count only the unnamed callers.
        let caller_binds = binder.binds.lock().iter().filter(|(name, _)| name.is_none()).count();
        assert_eq!(caller_binds, 4);
        assert!(executive.stop_managing().all_terminated());
    }

    #[test]
    fn test_bound_thread_reuses_its_core() {
        let (executive, _binder) = executive(vec![vec![0], vec![1]]);
        let executive = Arc::new(executive);
        let remote = Arc::clone(&executive);
        let (first, second) = thread::spawn(move || {
            let first = remote.create_process_identifier();
            let second = remote.create_process_identifier();
            (first, second)
        })
        .join()
        .unwrap();
        assert_eq!(first.affinity(), second.affinity());
        assert_ne!(first, second);
        executive.stop_managing();
    }

    #[test]
    fn test_schedule_runs_on_identifier_core() {
        let (executive, _binder) = executive(vec![vec![0], vec![1]]);
        let identifier = ProcessIdentifier::new(CoreAffinity::new(1));
        let (tx, rx) = mpsc::channel();
        executive
            .schedule(&identifier, Duration::from_millis(1), move || tx.send(current_affinity()).unwrap())
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(CoreAffinity::new(1)));

        let stranger = ProcessIdentifier::new(CoreAffinity::new(9));
        let err = executive.schedule(&stranger, Duration::ZERO, || {}).unwrap_err();
        assert!(err.is_configuration());
        executive.stop_managing();
    }

    #[test]
    fn test_unmanaged_team_ignores_affinity() {
        let (executive, _binder) = executive(vec![vec![0]]);
        let team = executive.create_team("plain", TeamOversight::None).unwrap();
        team.start_working().unwrap();

        let (tx, rx) = mpsc::channel();
        let job = Job::new(ProcessIdentifier::new(CoreAffinity::new(7)), move || {
            tx.send(current_affinity()).unwrap();
            Ok(())
        });
        team.assign_job(job).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);

        let report = executive.stop_managing();
        assert_eq!(report.pools.len(), 3);
        assert!(report.all_terminated());
    }
}
