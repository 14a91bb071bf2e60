//! Units of work and the identifiers that route them to a core.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::core::error::KernelError;

/// Index of the CPU core a process identifier (and all of its jobs) is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoreAffinity(usize);

impl CoreAffinity {
    /// Affinity for core `index`.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Core index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CoreAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core-{}", self.0)
    }
}

/// Opaque, immutable handle minted once per process and invocation chain.
///
/// Every job of the chain carries it, so all of them run on the same core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessIdentifier {
    id: Uuid,
    affinity: CoreAffinity,
}

impl ProcessIdentifier {
    /// Mint an identifier bound to `affinity`.
    #[must_use]
    pub fn new(affinity: CoreAffinity) -> Self {
        Self {
            id: Uuid::new_v4(),
            affinity,
        }
    }

    /// Unique id of the process.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Core the process is bound to.
    #[must_use]
    pub const fn affinity(&self) -> CoreAffinity {
        self.affinity
    }
}

impl fmt::Display for ProcessIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.affinity)
    }
}

/// Callback receiving a job's outcome.
pub type JobCompletion = Box<dyn FnOnce(Result<(), KernelError>) + Send + 'static>;

type Runnable = Box<dyn FnOnce() -> Result<(), KernelError> + Send + 'static>;

/// An executable closure tagged with the process identifier that routes it.
pub struct Job {
    identifier: ProcessIdentifier,
    runnable: Runnable,
    completion: Option<JobCompletion>,
}

impl Job {
    /// Wrap `runnable` for the process `identifier`.
    pub fn new<F>(identifier: ProcessIdentifier, runnable: F) -> Self
    where
        F: FnOnce() -> Result<(), KernelError> + Send + 'static,
    {
        Self {
            identifier,
            runnable: Box::new(runnable),
            completion: None,
        }
    }

    /// Attach the completion path that receives the job's outcome, failures included.
    #[must_use]
    pub fn with_completion<F>(mut self, completion: F) -> Self
    where
        F: FnOnce(Result<(), KernelError>) + Send + 'static,
    {
        self.completion = Some(Box::new(completion));
        self
    }

    /// Identifier routing this job.
    #[must_use]
    pub const fn identifier(&self) -> &ProcessIdentifier {
        &self.identifier
    }

    /// Run the job on the current thread and report its outcome.
    ///
    /// A panic is caught and reported as [`KernelError::JobPanicked`] through the
    /// completion path. Returns whether the job succeeded.
    pub fn run(self) -> bool {
        let Self {
            identifier,
            runnable,
            completion,
        } = self;

        let outcome = panic::catch_unwind(AssertUnwindSafe(runnable))
            .unwrap_or_else(|payload| Err(KernelError::JobPanicked(panic_message(payload.as_ref()))));
        let succeeded = outcome.is_ok();

        match (completion, outcome) {
            (Some(completion), outcome) => completion(outcome),
            (None, Err(err)) => {
                error!(process = %identifier, error = %err, "job failed with no completion path");
            }
            (None, Ok(())) => {}
        }
        succeeded
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("identifier", &self.identifier)
            .field("has_completion", &self.completion.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
