//! Core kernel abstractions: resource containers, scopes, coordination,
//! administration, jobs, and worker pools.

pub mod administration;
pub mod capability;
pub mod container;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod invocation;
pub mod job;
pub mod metadata;
pub mod resource;
pub mod scope;
pub mod worker_pool;

pub use administration::{AdministeredResourceBinding, AdministrationExecutor, Administrator, Duty, DutyPhase};
pub use capability::{Capability, CapabilityRegistry};
pub use container::{ContainerState, ResourceContainer};
pub use coordinator::{ScopeAccess, WorkCoordinator};
pub use error::{AppResult, KernelError, ResourceError};
pub use index::{ResourceIndex, ResourceScope};
pub use invocation::{
    InvocationContext, InvocationDriver, InvocationHandle, InvocationReport, ProcessState, ThreadState,
};
pub use job::{CoreAffinity, Job, JobCompletion, ProcessIdentifier};
pub use metadata::{
    InvocationBody, InvocationBuilder, InvocationMetadata, KernelMetadata, MetadataBuilder, ResourceDefinition,
    ScopeDefinitions,
};
pub use resource::{
    sync_factory, AsyncOperation, AsyncOperations, CoordinationContext, LoadCompletion, ManagedObject, Resource,
    ResourceFactory, Spawn, ValueResource,
};
pub use scope::{ScopeState, SharedScope};
pub use worker_pool::{PlainThreadSource, PoolError, PoolState, PoolStats, Team, ThreadSource, WorkerPool};
