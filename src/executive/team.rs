//! A team that routes every job to the pool of its core.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::job::Job;
use crate::core::worker_pool::{PoolError, PoolStats, Team, WorkerPool};

/// Routes jobs by the [`CoreAffinity`](crate::core::job::CoreAffinity) of their
/// process identifier. Pool `k` serves core `k`.
pub struct AffinityTeam {
    name: String,
    pools: Vec<Arc<WorkerPool>>,
}

impl AffinityTeam {
    pub(crate) fn new(name: impl Into<String>, pools: Vec<Arc<WorkerPool>>) -> Self {
        Self {
            name: name.into(),
            pools,
        }
    }

    /// Number of per-core pools.
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.pools.len()
    }

    /// Statistics of the pool serving `core`.
    #[must_use]
    pub fn pool_stats(&self, core: usize) -> Option<PoolStats> {
        self.pools.get(core).map(|pool| pool.stats())
    }
}

impl Team for AffinityTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_working(&self) -> Result<(), PoolError> {
        for pool in &self.pools {
            pool.start()?;
        }
        info!(team = %self.name, cores = self.pools.len(), "affinity team started");
        Ok(())
    }

    fn assign_job(&self, job: Job) -> Result<(), PoolError> {
        let core = job.identifier().affinity().index();
        let pool = self.pools.get(core).ok_or(PoolError::UnknownCore {
            core,
            cores: self.pools.len(),
        })?;
        debug!(team = %self.name, core, process = %job.identifier(), "job routed");
        pool.execute(job)
    }

    fn stop_working(&self) {
        for pool in &self.pools {
            pool.shutdown();
        }
    }
}

impl std::fmt::Debug for AffinityTeam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityTeam")
            .field("name", &self.name)
            .field("cores", &self.pools.len())
            .finish()
    }
}
