//! Per-resource container state machine.
//!
//! States move `Unloaded -> Loading -> {Ready, Failed}` and never revert. Loading is
//! poll based: [`ResourceContainer::load`] reports whether the resource is ready now
//! and callers re-poll later instead of blocking.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::core::error::{KernelError, ResourceError};
use crate::core::index::ResourceIndex;
use crate::core::metadata::ResourceDefinition;
use crate::core::resource::{
    AsyncOperations, CoordinationContext, LoadCompletion, ManagedObject, Resource, SettlementCell,
};

/// Observable state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Factory not yet invoked.
    Unloaded,
    /// Factory invoked, waiting for it to settle.
    Loading,
    /// Resource available.
    Ready,
    /// Factory failed; terminal.
    Failed,
}

impl ContainerState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Phase {
    Unloaded,
    Loading(Arc<SettlementCell>),
    Ready(Arc<dyn Resource>),
    Failed(ResourceError),
}

/// Owns exactly one resource instance bound into a scope.
pub struct ResourceContainer {
    index: ResourceIndex,
    definition: Arc<ResourceDefinition>,
    phase: Phase,
    operations: AsyncOperations,
    coordinated: bool,
    unloaded: bool,
}

impl ResourceContainer {
    /// Create an unloaded container for a compiled resource definition.
    #[must_use]
    pub fn new(index: ResourceIndex, definition: Arc<ResourceDefinition>) -> Self {
        Self {
            index,
            definition,
            phase: Phase::Unloaded,
            operations: AsyncOperations::default(),
            coordinated: false,
            unloaded: false,
        }
    }

    /// Index this container is bound to.
    #[must_use]
    pub const fn index(&self) -> ResourceIndex {
        self.index
    }

    /// Name of the contained resource.
    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Compiled definition of the contained resource.
    #[must_use]
    pub fn definition(&self) -> &Arc<ResourceDefinition> {
        &self.definition
    }

    /// Current state, without observing pending settlements.
    #[must_use]
    pub const fn state(&self) -> ContainerState {
        match self.phase {
            Phase::Unloaded => ContainerState::Unloaded,
            Phase::Loading(_) => ContainerState::Loading,
            Phase::Ready(_) => ContainerState::Ready,
            Phase::Failed(_) => ContainerState::Failed,
        }
    }

    /// Whether dependencies have been resolved for the resource.
    #[must_use]
    pub const fn is_coordinated(&self) -> bool {
        self.coordinated
    }

    /// Load the resource, invoking its factory on first call.
    ///
    /// Returns `Ok(true)` once the resource is ready and `Ok(false)` while the factory
    /// has not settled. Calling this on a ready container is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ResourceLoad`] once the factory has failed; the failure
    /// is terminal and the factory is never invoked again.
    pub fn load(&mut self) -> Result<bool, KernelError> {
        if matches!(self.phase, Phase::Unloaded) {
            let cell = Arc::new(SettlementCell::default());
            self.phase = Phase::Loading(Arc::clone(&cell));
            debug!(resource = %self.name(), index = %self.index, "invoking resource factory");
            self.definition
                .factory()
                .create(LoadCompletion::new(self.definition.name(), cell));
        }
        self.settle();
        match &self.phase {
            Phase::Ready(_) => Ok(true),
            Phase::Loading(_) | Phase::Unloaded => Ok(false),
            Phase::Failed(cause) => Err(KernelError::ResourceLoad {
                resource: self.name().to_owned(),
                cause: cause.clone(),
            }),
        }
    }

    /// Resolve dependencies with the objects of the (ready) dependencies.
    ///
    /// Runs the resource's coordination at most once.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NotReady`] if the container is not ready (a caller error)
    /// - [`KernelError::Coordination`] if the resource rejects its dependencies
    pub fn coordinate(&mut self, dependencies: &[ManagedObject]) -> Result<(), KernelError> {
        self.settle();
        let Phase::Ready(resource) = &self.phase else {
            return Err(KernelError::NotReady {
                resource: self.name().to_owned(),
                state: self.state().as_str(),
            });
        };
        if self.coordinated {
            return Ok(());
        }
        let context = CoordinationContext::new(dependencies, &self.operations);
        resource
            .coordinate(&context)
            .map_err(|cause| KernelError::Coordination {
                resource: self.definition.name().to_owned(),
                cause,
            })?;
        self.coordinated = true;
        debug!(resource = %self.name(), index = %self.index, "resource coordinated");
        Ok(())
    }

    /// Non-blocking readiness check.
    ///
    /// True once the resource is ready and no asynchronous operation it started during
    /// coordination is still in flight.
    pub fn is_ready(&mut self) -> bool {
        self.settle();
        matches!(self.phase, Phase::Ready(_)) && self.operations.pending() == 0
    }

    /// Like [`is_ready`](Self::is_ready), but surfaces a load failure.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ResourceLoad`] if the container has failed.
    pub fn check_ready(&mut self) -> Result<bool, KernelError> {
        let ready = self.is_ready();
        if let Phase::Failed(cause) = &self.phase {
            return Err(KernelError::ResourceLoad {
                resource: self.name().to_owned(),
                cause: cause.clone(),
            });
        }
        Ok(ready)
    }

    /// The contained resource, once ready.
    #[must_use]
    pub fn resource(&self) -> Option<&Arc<dyn Resource>> {
        match &self.phase {
            Phase::Ready(resource) => Some(resource),
            _ => None,
        }
    }

    /// The resource's object, once ready.
    #[must_use]
    pub fn object(&self) -> Option<ManagedObject> {
        self.resource().map(|resource| resource.object())
    }

    /// Unload the resource. Returns `false` if the container was already unloaded.
    pub fn unload(&mut self) -> bool {
        if self.unloaded {
            return false;
        }
        self.unloaded = true;
        self.settle();
        match &self.phase {
            Phase::Ready(resource) => {
                resource.unload();
                debug!(resource = %self.name(), index = %self.index, "resource unloaded");
            }
            Phase::Loading(cell) => {
                debug!(resource = %self.name(), index = %self.index, "unloading container still loading");
                if let Some(Ok(resource)) = cell.abandon() {
                    resource.unload();
                }
            }
            Phase::Unloaded | Phase::Failed(_) => {}
        }
        true
    }

    fn settle(&mut self) {
        let Phase::Loading(cell) = &self.phase else {
            return;
        };
        match cell.take() {
            Some(Ok(resource)) => {
                debug!(resource = %self.name(), index = %self.index, "resource ready");
                self.phase = Phase::Ready(resource);
            }
            Some(Err(cause)) => {
                debug!(resource = %self.name(), index = %self.index, error = %cause, "resource failed");
                self.phase = Phase::Failed(cause);
            }
            None => {}
        }
    }
}

impl fmt::Debug for ResourceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceContainer")
            .field("index", &self.index)
            .field("resource", &self.definition.name())
            .field("state", &self.state())
            .field("coordinated", &self.coordinated)
            .finish_non_exhaustive()
    }
}
