//! Error types for kernel operations.

use thiserror::Error;

use crate::core::index::ResourceIndex;
use crate::core::worker_pool::PoolError;

/// Errors produced by the resource coordination and scheduling kernel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// A resource index does not address a compiled resource.
    #[error("invalid resource index {index}: {reason}")]
    InvalidResourceIndex {
        /// Offending index.
        index: ResourceIndex,
        /// Why the index was rejected.
        reason: String,
    },
    /// A resource cannot supply the capability an administrator requires.
    #[error("resource `{resource}` does not supply capability `{capability}` required by duty `{duty}`")]
    MissingCapability {
        /// Name of the administered resource.
        resource: String,
        /// Type name of the required capability.
        capability: &'static str,
        /// Duty that requires the capability.
        duty: String,
    },
    /// A resource dependency is declared in a way that can never be satisfied.
    #[error("resource `{resource}` has invalid dependency {dependency}: {reason}")]
    InvalidDependency {
        /// Name of the dependent resource.
        resource: String,
        /// Index of the dependency.
        dependency: ResourceIndex,
        /// Why the dependency was rejected.
        reason: String,
    },
    /// An invocation name is not part of the compiled metadata.
    #[error("unknown invocation `{0}`")]
    UnknownInvocation(String),
    /// Configuration was rejected.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// A resource factory reported a failure.
    #[error("resource `{resource}` failed to load: {cause}")]
    ResourceLoad {
        /// Name of the resource.
        resource: String,
        /// Cause captured by the container.
        cause: ResourceError,
    },
    /// An operation required a ready container.
    #[error("resource `{resource}` is not ready (state {state})")]
    NotReady {
        /// Name of the resource.
        resource: String,
        /// State the container was observed in.
        state: &'static str,
    },
    /// A dependency was not ready when its dependent was coordinated.
    #[error("resource `{resource}` depends on {dependency}, which is not ready")]
    DependencyNotReady {
        /// Name of the dependent resource.
        resource: String,
        /// Index of the dependency.
        dependency: ResourceIndex,
    },
    /// A resource failed while resolving its dependencies.
    #[error("coordination of resource `{resource}` failed: {cause}")]
    Coordination {
        /// Name of the resource.
        resource: String,
        /// Failure reported by the resource.
        cause: ResourceError,
    },
    /// An administration duty failed.
    #[error("duty `{duty}` failed: {cause}")]
    Administration {
        /// Duty name.
        duty: String,
        /// Failure reported by the administrator.
        cause: String,
    },
    /// An invocation body failed.
    #[error("invocation `{invocation}` failed: {cause}")]
    Invocation {
        /// Invocation name.
        invocation: String,
        /// Failure reported by the body.
        cause: String,
    },
    /// A job panicked on its worker thread.
    #[error("job panicked: {0}")]
    JobPanicked(String),
    /// A worker pool rejected or lost work.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl KernelError {
    /// Whether this error is a configuration error: detected while binding, fatal to
    /// setup and never retried.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidResourceIndex { .. }
                | Self::MissingCapability { .. }
                | Self::InvalidDependency { .. }
                | Self::UnknownInvocation(_)
                | Self::Configuration(_)
                | Self::Pool(PoolError::UnknownCore { .. } | PoolError::InvalidConfig(_))
        )
    }
}

/// Failure reported by a resource while loading or coordinating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ResourceError {
    message: String,
}

impl ResourceError {
    /// Create an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for ResourceError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ResourceError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<anyhow::Error> for ResourceError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(KernelError::UnknownInvocation("x".into()).is_configuration());
        assert!(KernelError::Pool(PoolError::UnknownCore { core: 4, cores: 2 }).is_configuration());
        assert!(!KernelError::JobPanicked("boom".into()).is_configuration());
        assert!(!KernelError::Pool(PoolError::QueueFull).is_configuration());
    }

    #[test]
    fn test_resource_error_from_anyhow_keeps_context() {
        let err = anyhow::anyhow!("socket refused").context("connecting");
        let resource_err = ResourceError::from(err);
        assert_eq!(resource_err.message(), "connecting: socket refused");
    }
}
