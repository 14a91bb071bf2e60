//! Scope state: the containers materialized at one lifetime.
//!
//! Each scope holds a fixed-capacity arena of slots sized from compiled metadata.
//! A slot is populated at most once, on first reference. Process and thread scopes are
//! wrapped in [`SharedScope`] and only touched under its lock; the invocation scope is
//! owned by the job running the invocation.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::core::container::ResourceContainer;
use crate::core::error::KernelError;
use crate::core::index::{ResourceIndex, ResourceScope};
use crate::core::metadata::{ResourceDefinition, ScopeDefinitions};

/// Containers materialized at one scope.
#[derive(Debug)]
pub struct ScopeState {
    scope: ResourceScope,
    definitions: ScopeDefinitions,
    slots: Vec<Option<ResourceContainer>>,
    materialized: usize,
}

impl ScopeState {
    /// Create an empty scope sized for `definitions`.
    #[must_use]
    pub fn new(scope: ResourceScope, definitions: ScopeDefinitions) -> Self {
        let slots = std::iter::repeat_with(|| None)
            .take(definitions.len())
            .collect();
        Self {
            scope,
            definitions,
            slots,
            materialized: 0,
        }
    }

    /// Scope kind.
    #[must_use]
    pub const fn scope(&self) -> ResourceScope {
        self.scope
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of containers created over this scope's lifetime.
    #[must_use]
    pub const fn materialized(&self) -> usize {
        self.materialized
    }

    /// Definition compiled at `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidResourceIndex`] if the slot is out of range.
    pub fn definition(&self, slot: usize) -> Result<&Arc<ResourceDefinition>, KernelError> {
        self.definitions
            .get(slot)
            .ok_or_else(|| self.invalid(slot))
    }

    /// Container at `slot`, creating it on first reference.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidResourceIndex`] if the slot is out of range.
    pub fn container(&mut self, slot: usize) -> Result<&mut ResourceContainer, KernelError> {
        let definition = Arc::clone(self.definition(slot)?);
        let index = ResourceIndex::new(self.scope, slot);
        let entry = &mut self.slots[slot];
        if entry.is_none() {
            debug!(resource = %definition.name(), %index, "materializing container");
            self.materialized += 1;
        }
        Ok(entry.get_or_insert_with(|| ResourceContainer::new(index, definition)))
    }

    /// Container at `slot` if it has been created.
    #[must_use]
    pub fn existing(&self, slot: usize) -> Option<&ResourceContainer> {
        self.slots.get(slot)?.as_ref()
    }

    /// Mutable container at `slot` if it has been created.
    pub fn existing_mut(&mut self, slot: usize) -> Option<&mut ResourceContainer> {
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Unload and drop every materialized container. Returns how many were unloaded.
    ///
    /// Containers are taken out of their slots, so each is unloaded once.
    pub fn unload_all(&mut self) -> usize {
        let mut unloaded = 0;
        for slot in &mut self.slots {
            if let Some(mut container) = slot.take() {
                if container.unload() {
                    unloaded += 1;
                }
            }
        }
        if unloaded > 0 {
            debug!(scope = %self.scope, unloaded, "scope unloaded");
        }
        unloaded
    }

    fn invalid(&self, slot: usize) -> KernelError {
        KernelError::InvalidResourceIndex {
            index: ResourceIndex::new(self.scope, slot),
            reason: format!("scope holds {} resources", self.definitions.len()),
        }
    }
}

impl Drop for ScopeState {
    fn drop(&mut self) {
        self.unload_all();
    }
}

/// A scope shared between jobs; every access goes through its lock.
#[derive(Debug)]
pub struct SharedScope {
    state: Mutex<ScopeState>,
}

impl SharedScope {
    /// Create a shared scope sized for `definitions`.
    #[must_use]
    pub fn new(scope: ResourceScope, definitions: ScopeDefinitions) -> Self {
        Self {
            state: Mutex::new(ScopeState::new(scope, definitions)),
        }
    }

    /// Lock the scope.
    pub fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock()
    }

    /// Tear the scope down, unloading its containers.
    pub fn teardown(&self) -> usize {
        self.state.lock().unload_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::{sync_factory, ValueResource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn definitions(count: usize) -> ScopeDefinitions {
        (0..count)
            .map(|i| {
                Arc::new(ResourceDefinition::new::<ValueResource<usize>>(
                    format!("r{i}"),
                    sync_factory(move || Ok(ValueResource::new(i))),
                ))
            })
            .collect()
    }

    #[test]
    fn test_container_created_once() {
        let mut scope = ScopeState::new(ResourceScope::Invocation, definitions(2));
        scope.container(1).unwrap();
        scope.container(1).unwrap();
        assert_eq!(scope.materialized(), 1);
        assert!(scope.existing(0).is_none());
        assert!(scope.existing(1).is_some());
    }

    #[test]
    fn test_out_of_range_slot() {
        let mut scope = ScopeState::new(ResourceScope::Thread, definitions(1));
        let err = scope.container(5).unwrap_err();
        assert!(matches!(
            err,
            KernelError::InvalidResourceIndex { index, .. } if index == ResourceIndex::thread(5)
        ));
    }

    #[test]
    fn test_shared_scope_materializes_once_across_threads() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let definitions: ScopeDefinitions = vec![Arc::new(ResourceDefinition::new::<ValueResource<u8>>(
            "shared",
            sync_factory(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ValueResource::new(1_u8))
            }),
        ))]
        .into();
        let scope = Arc::new(SharedScope::new(ResourceScope::Process, definitions));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scope = Arc::clone(&scope);
                thread::spawn(move || scope.lock().container(0).unwrap().load().unwrap())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(scope.lock().materialized(), 1);
        assert_eq!(scope.teardown(), 1);
        assert_eq!(scope.teardown(), 0);
    }
}
