//! Resources, their factories and the handles factories settle.
//!
//! A [`ResourceFactory`] is handed a [`LoadCompletion`] when its container is first
//! loaded. It may settle the handle before returning (synchronous creation) or move it
//! to another thread or task and settle it later (asynchronous creation). The
//! container never blocks on the handle; it observes the settlement on its next poll.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::error::ResourceError;

/// The object a resource supplies to invocations and dependent resources.
pub type ManagedObject = Arc<dyn Any + Send + Sync>;

/// An externally supplied resource bound into a scope.
pub trait Resource: Any + Send + Sync {
    /// The object injected into invocations.
    fn object(&self) -> ManagedObject;

    /// Resolve dependencies on other resources' objects.
    ///
    /// Called once, after this resource and all of its dependencies are ready.
    ///
    /// # Errors
    ///
    /// Returns the cause when the dependencies cannot be used.
    fn coordinate(&self, _context: &CoordinationContext<'_>) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Release the resource when its scope is torn down.
    fn unload(&self) {}
}

/// Resource wrapping a plain value.
#[derive(Debug)]
pub struct ValueResource<T> {
    value: Arc<T>,
}

impl<T: Any + Send + Sync> ValueResource<T> {
    /// Wrap a value.
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    /// The wrapped value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: Any + Send + Sync> Resource for ValueResource<T> {
    fn object(&self) -> ManagedObject {
        Arc::clone(&self.value) as ManagedObject
    }
}

/// Counter of asynchronous operations a resource has in flight.
#[derive(Debug, Clone, Default)]
pub struct AsyncOperations {
    pending: Arc<AtomicUsize>,
}

impl AsyncOperations {
    /// Register a new in-flight operation.
    #[must_use]
    pub fn begin(&self) -> AsyncOperation {
        self.pending.fetch_add(1, Ordering::AcqRel);
        AsyncOperation {
            pending: Arc::clone(&self.pending),
        }
    }

    /// Number of operations still in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// An in-flight asynchronous operation. Completes when dropped.
#[derive(Debug)]
#[must_use = "dropping the operation completes it immediately"]
pub struct AsyncOperation {
    pending: Arc<AtomicUsize>,
}

impl AsyncOperation {
    /// Mark the operation complete.
    pub fn complete(self) {}
}

impl Drop for AsyncOperation {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// What a resource sees while coordinating.
pub struct CoordinationContext<'a> {
    dependencies: &'a [ManagedObject],
    operations: &'a AsyncOperations,
}

impl<'a> CoordinationContext<'a> {
    pub(crate) const fn new(dependencies: &'a [ManagedObject], operations: &'a AsyncOperations) -> Self {
        Self {
            dependencies,
            operations,
        }
    }

    /// Number of declared dependencies.
    #[must_use]
    pub const fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }

    /// Object of the dependency at `position` in declaration order.
    #[must_use]
    pub fn dependency(&self, position: usize) -> Option<&ManagedObject> {
        self.dependencies.get(position)
    }

    /// Typed object of the dependency at `position`.
    #[must_use]
    pub fn dependency_as<T: Any>(&self, position: usize) -> Option<&T> {
        self.dependencies.get(position)?.downcast_ref::<T>()
    }

    /// Start an asynchronous operation; the container is not ready until it completes.
    #[must_use]
    pub fn begin_operation(&self) -> AsyncOperation {
        self.operations.begin()
    }
}

type Settlement = Result<Arc<dyn Resource>, ResourceError>;

#[derive(Default)]
struct CellState {
    outcome: Option<Settlement>,
    abandoned: bool,
}

/// Slot a factory settles and a container polls.
///
/// Once abandoned by its container, a resource settled into the slot is unloaded on
/// the settling thread instead of being stored.
#[derive(Default)]
pub(crate) struct SettlementCell {
    state: Mutex<CellState>,
}

impl SettlementCell {
    pub(crate) fn take(&self) -> Option<Settlement> {
        self.state.lock().outcome.take()
    }

    /// Mark the cell abandoned, returning an outcome that arrived but was not taken.
    pub(crate) fn abandon(&self) -> Option<Settlement> {
        let mut state = self.state.lock();
        state.abandoned = true;
        state.outcome.take()
    }

    fn put(&self, resource: &str, outcome: Settlement) {
        let mut state = self.state.lock();
        if !state.abandoned {
            state.outcome = Some(outcome);
            return;
        }
        drop(state);
        if let Ok(late) = outcome {
            debug!(resource, "resource settled after its container was unloaded");
            late.unload();
        }
    }
}

/// Handle a factory settles exactly once with the created resource or a failure.
///
/// Dropping the handle unsettled fails the load, so an abandoned creation never
/// leaves its invocation pending forever.
pub struct LoadCompletion {
    resource: String,
    cell: Option<Arc<SettlementCell>>,
}

impl LoadCompletion {
    pub(crate) fn new(resource: &str, cell: Arc<SettlementCell>) -> Self {
        Self {
            resource: resource.to_owned(),
            cell: Some(cell),
        }
    }

    /// Name of the resource being created.
    #[must_use]
    pub fn resource_name(&self) -> &str {
        &self.resource
    }

    /// Settle with the created resource.
    pub fn complete<R: Resource>(self, resource: R) {
        self.settle(Ok(Arc::new(resource)));
    }

    /// Settle with an already shared resource.
    pub fn complete_shared(self, resource: Arc<dyn Resource>) {
        self.settle(Ok(resource));
    }

    /// Settle with a failure.
    pub fn fail(self, cause: impl Into<ResourceError>) {
        self.settle(Err(cause.into()));
    }

    fn settle(mut self, outcome: Settlement) {
        if let Some(cell) = self.cell.take() {
            cell.put(&self.resource, outcome);
        }
    }
}

impl Drop for LoadCompletion {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            warn!(resource = %self.resource, "load completion dropped without settling");
            cell.put(
                &self.resource,
                Err(ResourceError::new("factory released its completion without settling it")),
            );
        }
    }
}

/// Creates resource instances for a container.
pub trait ResourceFactory: Send + Sync {
    /// Begin creating a resource; settle `completion` now or later.
    fn create(&self, completion: LoadCompletion);
}

impl<F> ResourceFactory for F
where
    F: Fn(LoadCompletion) + Send + Sync,
{
    fn create(&self, completion: LoadCompletion) {
        self(completion);
    }
}

/// Factory that creates its resource synchronously from a closure.
pub fn sync_factory<R, F>(create: F) -> impl ResourceFactory
where
    R: Resource,
    F: Fn() -> Result<R, ResourceError> + Send + Sync + 'static,
{
    move |completion: LoadCompletion| match create() {
        Ok(resource) => completion.complete(resource),
        Err(cause) => completion.fail(cause),
    }
}

/// Abstraction for spawning futures on a runtime.
pub trait Spawn {
    /// Spawn a future that runs to completion in the background.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
