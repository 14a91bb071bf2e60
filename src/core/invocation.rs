//! Invocation driver: runs invocation chains as jobs on their process's core.
//!
//! An invocation is driven in steps, each one a [`Job`] assigned to the team:
//!
//! 1. load the required resources in order, up to the first one still pending
//! 2. coordinate dependencies
//! 3. wait until every resource reports ready
//! 4. pre duties, body, post duties
//! 5. unload the invocation scope, then dispatch the `next` invocation as a new job
//!
//! A step that finds resources pending never blocks its worker: it parks itself on the
//! scheduled pool of its core and is dispatched again after the poll interval.
//! Failures (including panics) reach the [`InvocationHandle`] through the job's
//! completion path. A failed step drops its invocation scope and its chain's thread
//! scope, unloading both.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::core::coordinator::WorkCoordinator;
use crate::core::error::KernelError;
use crate::core::index::{ResourceIndex, ResourceScope};
use crate::core::job::{Job, ProcessIdentifier};
use crate::core::metadata::{InvocationMetadata, KernelMetadata};
use crate::core::resource::ManagedObject;
use crate::core::scope::{ScopeState, SharedScope};
use crate::core::worker_pool::{PoolError, Team};
use crate::executive::Executive;

/// A process: its identifier and its process-scope resources.
///
/// Clones share the same scope. The scope is torn down with [`ProcessState::teardown`]
/// or when the last clone and every chain using it are dropped.
#[derive(Debug, Clone)]
pub struct ProcessState {
    identifier: ProcessIdentifier,
    scope: Arc<SharedScope>,
}

impl ProcessState {
    /// Process with an empty scope sized for `metadata`.
    #[must_use]
    pub fn new(identifier: ProcessIdentifier, metadata: &KernelMetadata) -> Self {
        Self {
            identifier,
            scope: Arc::new(SharedScope::new(
                ResourceScope::Process,
                Arc::clone(metadata.process_resources()),
            )),
        }
    }

    /// The process identifier.
    #[must_use]
    pub const fn identifier(&self) -> &ProcessIdentifier {
        &self.identifier
    }

    /// Process-scope state.
    #[must_use]
    pub fn scope(&self) -> &SharedScope {
        &self.scope
    }

    /// Unload every process-scope resource. Returns how many were unloaded.
    pub fn teardown(&self) -> usize {
        let unloaded = self.scope.teardown();
        debug!(process = %self.identifier, unloaded, "process scope torn down");
        unloaded
    }
}

/// Thread-scope resources of one invocation chain.
#[derive(Debug)]
pub struct ThreadState {
    scope: SharedScope,
}

impl ThreadState {
    /// Thread state with an empty scope sized for `metadata`.
    #[must_use]
    pub fn new(metadata: &KernelMetadata) -> Self {
        Self {
            scope: SharedScope::new(ResourceScope::Thread, Arc::clone(metadata.thread_resources())),
        }
    }

    /// Thread-scope state.
    #[must_use]
    pub const fn scope(&self) -> &SharedScope {
        &self.scope
    }
}

/// What an invocation body sees: its required objects, in declared order.
pub struct InvocationContext<'a> {
    invocation: &'a str,
    identifier: &'a ProcessIdentifier,
    objects: &'a [(ResourceIndex, ManagedObject)],
}

impl<'a> InvocationContext<'a> {
    /// Context over resolved objects.
    #[must_use]
    pub const fn new(
        invocation: &'a str,
        identifier: &'a ProcessIdentifier,
        objects: &'a [(ResourceIndex, ManagedObject)],
    ) -> Self {
        Self {
            invocation,
            identifier,
            objects,
        }
    }

    /// Invocation name.
    #[must_use]
    pub const fn invocation(&self) -> &str {
        self.invocation
    }

    /// Identifier of the process running the invocation.
    #[must_use]
    pub const fn identifier(&self) -> &ProcessIdentifier {
        self.identifier
    }

    /// Number of objects.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the invocation requires no resources.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Object at `position` in the required list, downcast to `T`.
    #[must_use]
    pub fn object<T: Any>(&self, position: usize) -> Option<&T> {
        self.objects.get(position)?.1.downcast_ref::<T>()
    }

    /// Object of the resource at `index`, downcast to `T`.
    #[must_use]
    pub fn object_for<T: Any>(&self, index: ResourceIndex) -> Option<&T> {
        self.objects
            .iter()
            .find(|(candidate, _)| *candidate == index)?
            .1
            .downcast_ref::<T>()
    }
}

/// Outcome of a completed invocation chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationReport {
    /// Process that ran the chain.
    pub identifier: ProcessIdentifier,
    /// Invocations completed, in order.
    pub invocations: Vec<String>,
}

type Outcome = Result<InvocationReport, KernelError>;

/// Handle on a running invocation chain.
#[derive(Debug)]
pub struct InvocationHandle {
    invocation: String,
    identifier: ProcessIdentifier,
    outcome: Receiver<Outcome>,
}

impl InvocationHandle {
    /// Identifier of the process running the chain.
    #[must_use]
    pub const fn identifier(&self) -> &ProcessIdentifier {
        &self.identifier
    }

    /// Wait up to `timeout` for the chain to finish.
    ///
    /// # Errors
    ///
    /// - the first failure of the chain
    /// - `KernelError::Pool(PoolError::Timeout)` if it is still running
    /// - [`KernelError::Invocation`] if the chain was abandoned, for example because
    ///   the executive stopped while it was parked
    pub fn wait(&self, timeout: Duration) -> Result<InvocationReport, KernelError> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(PoolError::Timeout.into()),
            Err(RecvTimeoutError::Disconnected) => Err(KernelError::Invocation {
                invocation: self.invocation.clone(),
                cause: "invocation abandoned before completing".into(),
            }),
        }
    }
}

struct DriverShared {
    metadata: Arc<KernelMetadata>,
    executive: Arc<Executive>,
    team: Arc<dyn Team>,
    poll_interval: Duration,
}

/// Dispatches invocation chains onto a team.
#[derive(Clone)]
pub struct InvocationDriver {
    shared: Arc<DriverShared>,
}

impl InvocationDriver {
    /// Driver running `metadata`'s invocations on `team`, parking pending steps on
    /// `executive`'s scheduled pools.
    #[must_use]
    pub fn new(
        metadata: Arc<KernelMetadata>,
        executive: Arc<Executive>,
        team: Arc<dyn Team>,
        config: &DriverConfig,
    ) -> Self {
        Self {
            shared: Arc::new(DriverShared {
                metadata,
                executive,
                team,
                poll_interval: config.poll_interval(),
            }),
        }
    }

    /// The compiled metadata.
    #[must_use]
    pub fn metadata(&self) -> &Arc<KernelMetadata> {
        &self.shared.metadata
    }

    /// Mint a process on the calling thread's core (see
    /// [`Executive::create_process_identifier`]).
    #[must_use]
    pub fn create_process(&self) -> ProcessState {
        let identifier = self.shared.executive.create_process_identifier();
        ProcessState::new(identifier, &self.shared.metadata)
    }

    /// Run invocation `name` in a fresh process.
    ///
    /// # Errors
    ///
    /// Same as [`InvocationDriver::invoke_in`].
    pub fn invoke(&self, name: &str) -> Result<InvocationHandle, KernelError> {
        let process = self.create_process();
        self.invoke_in(&process, name)
    }

    /// Run invocation `name` (and its `next` chain) in `process`.
    ///
    /// # Errors
    ///
    /// - [`KernelError::UnknownInvocation`] if `name` was not compiled
    /// - [`KernelError::Pool`] if the first job cannot be assigned
    pub fn invoke_in(&self, process: &ProcessState, name: &str) -> Result<InvocationHandle, KernelError> {
        let invocation = Arc::clone(self.shared.metadata.invocation(name)?);
        let (outcome_tx, outcome_rx) = unbounded();
        let chain = Chain {
            shared: Arc::clone(&self.shared),
            process: process.clone(),
            thread: ThreadState::new(&self.shared.metadata),
            outcome: outcome_tx,
            completed: Vec::new(),
        };
        info!(invocation = %name, process = %process.identifier(), "invocation started");
        Step::new(chain, invocation).dispatch()?;
        Ok(InvocationHandle {
            invocation: name.to_owned(),
            identifier: process.identifier().clone(),
            outcome: outcome_rx,
        })
    }
}

impl fmt::Debug for InvocationDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationDriver")
            .field("team", &self.shared.team.name())
            .field("poll_interval", &self.shared.poll_interval)
            .finish_non_exhaustive()
    }
}

/// State carried along one invocation chain.
struct Chain {
    shared: Arc<DriverShared>,
    process: ProcessState,
    thread: ThreadState,
    outcome: Sender<Outcome>,
    completed: Vec<String>,
}

impl Chain {
    fn finish(self) {
        let unloaded = self.thread.scope.teardown();
        debug!(process = %self.process.identifier, unloaded, "thread scope torn down");
        info!(
            process = %self.process.identifier,
            invocations = self.completed.len(),
            "invocation chain completed"
        );
        let report = InvocationReport {
            identifier: self.process.identifier.clone(),
            invocations: self.completed,
        };
        // The handle may have been dropped; nobody is waiting then.
        let _ = self.outcome.send(Ok(report));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Loading,
    Coordinating,
    Settling,
    Executing,
}

/// One invocation of a chain, resumable across jobs.
struct Step {
    chain: Chain,
    invocation: Arc<InvocationMetadata>,
    scope: ScopeState,
    stage: Stage,
    passes: u32,
}

impl Step {
    fn new(chain: Chain, invocation: Arc<InvocationMetadata>) -> Self {
        let scope = ScopeState::new(ResourceScope::Invocation, Arc::clone(invocation.resources()));
        Self {
            chain,
            invocation,
            scope,
            stage: Stage::Loading,
            passes: 0,
        }
    }

    /// Assign this step to the team as a job. Failures of the job are sent to the
    /// chain's handle.
    fn dispatch(self) -> Result<(), KernelError> {
        let identifier = self.chain.process.identifier.clone();
        let team = Arc::clone(&self.chain.shared.team);
        let failures = self.chain.outcome.clone();
        let job = Job::new(identifier, move || self.run()).with_completion(move |result| {
            if let Err(err) = result {
                let _ = failures.send(Err(err));
            }
        });
        team.assign_job(job)?;
        Ok(())
    }

    /// Dispatch from a scheduler thread, where there is no caller to return to.
    fn redispatch(self) {
        let failures = self.chain.outcome.clone();
        let name = self.invocation.name().to_owned();
        if let Err(err) = self.dispatch() {
            warn!(invocation = %name, error = %err, "parked invocation could not be resumed");
            let _ = failures.send(Err(err));
        }
    }

    fn run(mut self) -> Result<(), KernelError> {
        self.passes += 1;
        loop {
            let required = self.invocation.required();
            let Chain {
                shared,
                process,
                thread,
                ..
            } = &self.chain;
            let mut coordinator = WorkCoordinator::new(
                &process.scope,
                &thread.scope,
                &mut self.scope,
                shared.metadata.capabilities(),
            );

            match self.stage {
                Stage::Loading => {
                    if !coordinator.load_resources(required)? {
                        return self.park();
                    }
                    self.stage = Stage::Coordinating;
                }
                Stage::Coordinating => {
                    coordinator.coordinate_resources(required)?;
                    self.stage = Stage::Settling;
                }
                Stage::Settling => {
                    if !coordinator.resources_ready(required)? {
                        return self.park();
                    }
                    self.stage = Stage::Executing;
                }
                Stage::Executing => {
                    for binding in self.invocation.pre_duties() {
                        coordinator.administer(binding)?;
                    }
                    let objects = coordinator.objects(required)?;
                    let context = InvocationContext::new(self.invocation.name(), &process.identifier, &objects);
                    (self.invocation.body())(&context).map_err(|err| KernelError::Invocation {
                        invocation: self.invocation.name().to_owned(),
                        cause: format!("{err:#}"),
                    })?;
                    for binding in self.invocation.post_duties() {
                        coordinator.administer(binding)?;
                    }
                    coordinator.unload_invocation_resources();
                    return self.complete();
                }
            }
        }
    }

    fn park(self) -> Result<(), KernelError> {
        let shared = Arc::clone(&self.chain.shared);
        let identifier = self.chain.process.identifier.clone();
        debug!(
            invocation = %self.invocation.name(),
            process = %identifier,
            stage = ?self.stage,
            passes = self.passes,
            "invocation pending, parking"
        );
        shared
            .executive
            .schedule(&identifier, shared.poll_interval, move || self.redispatch())
    }

    fn complete(self) -> Result<(), KernelError> {
        let Self {
            mut chain,
            invocation,
            ..
        } = self;
        debug!(invocation = %invocation.name(), process = %chain.process.identifier, "invocation completed");
        chain.completed.push(invocation.name().to_owned());

        match invocation.next() {
            Some(next) => {
                let next = Arc::clone(chain.shared.metadata.invocation(next)?);
                Step::new(chain, next).dispatch()
            }
            None => {
                chain.finish();
                Ok(())
            }
        }
    }
}
