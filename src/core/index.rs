//! Resource indices and the scopes they address.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifetime a resource container is bound to.
///
/// Variants are ordered from shortest to longest lived, so `a <= b` reads as
/// "`b` lives at least as long as `a`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceScope {
    /// Lives for a single invocation and is owned by the job running it.
    Invocation,
    /// Lives for a thread-of-control: a chain of linked invocations.
    Thread,
    /// Lives for the whole process and is shared by all of its threads.
    Process,
}

impl ResourceScope {
    /// Whether a resource at this scope may depend on a resource at `dependency`.
    ///
    /// A dependency must outlive its dependent.
    #[must_use]
    pub fn may_depend_on(self, dependency: Self) -> bool {
        dependency >= self
    }

    /// Whether containers at this scope are shared between jobs (and so locked).
    #[must_use]
    pub const fn is_shared(self) -> bool {
        !matches!(self, Self::Invocation)
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invocation => write!(f, "invocation"),
            Self::Thread => write!(f, "thread"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Identifies one resource binding: its scope and slot within that scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIndex {
    /// Scope holding the container.
    pub scope: ResourceScope,
    /// Slot of the container within its scope.
    pub slot: usize,
}

impl ResourceIndex {
    /// Create an index.
    #[must_use]
    pub const fn new(scope: ResourceScope, slot: usize) -> Self {
        Self { scope, slot }
    }

    /// Index of a process-scoped resource.
    #[must_use]
    pub const fn process(slot: usize) -> Self {
        Self::new(ResourceScope::Process, slot)
    }

    /// Index of a thread-scoped resource.
    #[must_use]
    pub const fn thread(slot: usize) -> Self {
        Self::new(ResourceScope::Thread, slot)
    }

    /// Index of an invocation-scoped resource.
    #[must_use]
    pub const fn invocation(slot: usize) -> Self {
        Self::new(ResourceScope::Invocation, slot)
    }
}

impl fmt::Display for ResourceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.scope, self.slot)
    }
}
