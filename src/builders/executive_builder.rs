//! Builders assembling an executive and an invocation driver from configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::{DriverConfig, ExecutiveConfig};
use crate::core::error::KernelError;
use crate::core::invocation::InvocationDriver;
use crate::core::metadata::KernelMetadata;
use crate::executive::{AffinityBinder, CpuTopology, Executive, NoopBinder, OsAffinityBinder, TeamOversight};

/// Name of the team invocations run on.
pub const INVOCATION_TEAM: &str = "invocations";

/// Builds an [`Executive`], discovering the topology and choosing a binder unless told
/// otherwise.
pub struct ExecutiveBuilder {
    config: ExecutiveConfig,
    topology: Option<CpuTopology>,
    binder: Option<Arc<dyn AffinityBinder>>,
}

impl ExecutiveBuilder {
    /// Builder over `config`.
    #[must_use]
    pub const fn new(config: ExecutiveConfig) -> Self {
        Self {
            config,
            topology: None,
            binder: None,
        }
    }

    /// Use `topology` instead of discovering one.
    #[must_use]
    pub fn with_topology(mut self, topology: CpuTopology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Use `binder` instead of the OS binder.
    #[must_use]
    pub fn with_binder(mut self, binder: Arc<dyn AffinityBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    /// Build the executive.
    ///
    /// Without an explicit binder, threads are pinned through the OS when
    /// `pin_threads` is set and left alone otherwise.
    ///
    /// # Errors
    ///
    /// Same as [`Executive::new`].
    pub fn build(self) -> Result<Executive, KernelError> {
        let topology = self.topology.unwrap_or_else(CpuTopology::discover);
        let binder = self.binder.unwrap_or_else(|| {
            if self.config.pin_threads {
                Arc::new(OsAffinityBinder)
            } else {
                Arc::new(NoopBinder)
            }
        });
        Executive::new(self.config, topology, binder)
    }
}

/// Start an affinity team on `executive` and return a driver running `metadata`'s
/// invocations on it.
///
/// # Errors
///
/// - [`KernelError::Configuration`] for an invalid driver configuration
/// - [`KernelError::Pool`] if the team cannot start
pub fn build_driver(
    executive: Arc<Executive>,
    metadata: KernelMetadata,
    config: &DriverConfig,
) -> Result<InvocationDriver, KernelError> {
    config.validate().map_err(KernelError::Configuration)?;
    let team = executive.create_team(INVOCATION_TEAM, TeamOversight::Affinity)?;
    team.start_working()?;
    info!(
        team = INVOCATION_TEAM,
        cores = executive.core_count(),
        invocations = metadata.invocation_names().count(),
        "invocation driver ready"
    );
    Ok(InvocationDriver::new(Arc::new(metadata), executive, team, config))
}
