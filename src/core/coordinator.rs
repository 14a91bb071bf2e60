//! The work coordinator: drives an invocation's resource containers.
//!
//! Every operation walks a list of [`ResourceIndex`]es in declared order and reaches
//! the owning scope through a single lookup, [`WorkCoordinator::scope_state`]. Shared
//! scopes (process and thread) are locked for the duration of one container's work;
//! the invocation scope is owned by the running job and needs no lock. At most one
//! scope lock is held at any time.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::debug;

use crate::core::administration::{AdministeredResourceBinding, AdministrationExecutor};
use crate::core::capability::CapabilityRegistry;
use crate::core::container::ResourceContainer;
use crate::core::error::KernelError;
use crate::core::index::{ResourceIndex, ResourceScope};
use crate::core::resource::ManagedObject;
use crate::core::scope::{ScopeState, SharedScope};

/// Access to one scope's state: locked when shared, borrowed when owned.
pub enum ScopeAccess<'s> {
    /// Process or thread scope, held under its lock.
    Shared(MutexGuard<'s, ScopeState>),
    /// The invocation scope, exclusively owned by the running job.
    Exclusive(&'s mut ScopeState),
}

impl Deref for ScopeAccess<'_> {
    type Target = ScopeState;

    fn deref(&self) -> &ScopeState {
        match self {
            Self::Shared(guard) => guard,
            Self::Exclusive(state) => state,
        }
    }
}

impl DerefMut for ScopeAccess<'_> {
    fn deref_mut(&mut self) -> &mut ScopeState {
        match self {
            Self::Shared(guard) => guard,
            Self::Exclusive(state) => state,
        }
    }
}

/// Coordinates the containers of one invocation across the three scopes.
pub struct WorkCoordinator<'a> {
    process: &'a SharedScope,
    thread: &'a SharedScope,
    invocation: &'a mut ScopeState,
    capabilities: &'a CapabilityRegistry,
}

impl<'a> WorkCoordinator<'a> {
    /// Coordinator over the given scopes.
    pub fn new(
        process: &'a SharedScope,
        thread: &'a SharedScope,
        invocation: &'a mut ScopeState,
        capabilities: &'a CapabilityRegistry,
    ) -> Self {
        Self {
            process,
            thread,
            invocation,
            capabilities,
        }
    }

    /// The state of `scope`.
    pub fn scope_state(&mut self, scope: ResourceScope) -> ScopeAccess<'_> {
        match scope {
            ResourceScope::Process => ScopeAccess::Shared(self.process.lock()),
            ResourceScope::Thread => ScopeAccess::Shared(self.thread.lock()),
            ResourceScope::Invocation => ScopeAccess::Exclusive(&mut *self.invocation),
        }
    }

    /// Load every resource in `indices`, creating containers on first reference.
    ///
    /// Stops at the first resource still pending: later resources are not loaded until
    /// it settles. `Ok(true)` only when all of them are ready.
    ///
    /// # Errors
    ///
    /// - [`KernelError::InvalidResourceIndex`] for an index outside its scope
    /// - [`KernelError::ResourceLoad`] for a failed resource
    pub fn load_resources(&mut self, indices: &[ResourceIndex]) -> Result<bool, KernelError> {
        for &index in indices {
            let mut state = self.scope_state(index.scope);
            if !state.container(index.slot)?.load()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Hand each loaded resource the objects of its dependencies.
    ///
    /// # Errors
    ///
    /// - [`KernelError::DependencyNotReady`] if a dependency is not loaded
    /// - [`KernelError::NotReady`] if a listed resource is not loaded
    /// - [`KernelError::Coordination`] if a resource rejects its dependencies
    pub fn coordinate_resources(&mut self, indices: &[ResourceIndex]) -> Result<(), KernelError> {
        for &index in indices {
            let definition = {
                let state = self.scope_state(index.scope);
                Arc::clone(state.definition(index.slot)?)
            };

            let mut objects: Vec<ManagedObject> = Vec::with_capacity(definition.dependencies().len());
            for &dependency in definition.dependencies() {
                let state = self.scope_state(dependency.scope);
                let object = state
                    .existing(dependency.slot)
                    .and_then(ResourceContainer::object)
                    .ok_or_else(|| KernelError::DependencyNotReady {
                        resource: definition.name().to_owned(),
                        dependency,
                    })?;
                objects.push(object);
            }

            let mut state = self.scope_state(index.scope);
            let container = state
                .existing_mut(index.slot)
                .ok_or_else(|| KernelError::NotReady {
                    resource: definition.name().to_owned(),
                    state: "unloaded",
                })?;
            container.coordinate(&objects)?;
        }
        Ok(())
    }

    /// Whether every resource in `indices` is ready, including asynchronous work
    /// started during coordination. Stops at the first resource not yet ready.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ResourceLoad`] if a resource has failed.
    pub fn resources_ready(&mut self, indices: &[ResourceIndex]) -> Result<bool, KernelError> {
        for &index in indices {
            let mut state = self.scope_state(index.scope);
            let ready = match state.existing_mut(index.slot) {
                Some(container) => container.check_ready()?,
                None => false,
            };
            if !ready {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run a duty over the capabilities of its administered resources.
    ///
    /// Each capability is extracted under its resource's scope lock; the administrator
    /// runs after every lock is released.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NotReady`] if an administered resource is not loaded
    /// - [`KernelError::MissingCapability`] if a resource cannot supply the capability
    /// - [`KernelError::Administration`] if the duty fails
    pub fn administer(&mut self, binding: &AdministeredResourceBinding) -> Result<(), KernelError> {
        let executor = AdministrationExecutor::new(self.capabilities);
        let mut capabilities = Vec::with_capacity(binding.resources().len());
        for &index in binding.resources() {
            let state = self.scope_state(index.scope);
            let name = state.definition(index.slot)?.name().to_owned();
            let container = state.existing(index.slot);
            let Some(resource) = container.and_then(ResourceContainer::resource) else {
                return Err(KernelError::NotReady {
                    resource: name,
                    state: container.map_or("unloaded", |c| c.state().as_str()),
                });
            };
            capabilities.push(executor.resolve(binding, &name, resource.as_ref())?);
        }
        executor.execute(binding, &capabilities)
    }

    /// Objects of the resources in `indices`, paired with their index.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotReady`] if a resource is not loaded.
    pub fn objects(&mut self, indices: &[ResourceIndex]) -> Result<Vec<(ResourceIndex, ManagedObject)>, KernelError> {
        let mut objects = Vec::with_capacity(indices.len());
        for &index in indices {
            let state = self.scope_state(index.scope);
            let object = match state.existing(index.slot) {
                Some(container) => container.object().ok_or_else(|| KernelError::NotReady {
                    resource: container.name().to_owned(),
                    state: container.state().as_str(),
                })?,
                None => {
                    return Err(KernelError::NotReady {
                        resource: state.definition(index.slot)?.name().to_owned(),
                        state: "unloaded",
                    })
                }
            };
            objects.push((index, object));
        }
        Ok(objects)
    }

    /// Unload every invocation-scope container. A second call unloads nothing.
    pub fn unload_invocation_resources(&mut self) -> usize {
        let unloaded = self.invocation.unload_all();
        debug!(unloaded, "invocation resources unloaded");
        unloaded
    }
}
