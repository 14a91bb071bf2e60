//! Administration duties run over resource capabilities around an invocation body.
//!
//! A duty (for example beginning or committing a transaction) is bound to a set of
//! resources and to the capability it needs from each of them. Bindings are validated
//! against the [`CapabilityRegistry`] when metadata is built; at run time the executor
//! resolves capabilities from ready resources and hands them to the administrator.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::core::capability::{Capability, CapabilityRegistry};
use crate::core::error::{AppResult, KernelError};
use crate::core::index::ResourceIndex;
use crate::core::metadata::ResourceDefinition;
use crate::core::resource::Resource;

/// When a duty runs relative to the invocation body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyPhase {
    /// Before the body.
    Pre,
    /// After the body.
    Post,
}

/// A named duty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duty {
    name: String,
    phase: DutyPhase,
}

impl Duty {
    /// Create a duty.
    pub fn new(name: impl Into<String>, phase: DutyPhase) -> Self {
        Self {
            name: name.into(),
            phase,
        }
    }

    /// Duty name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Duty phase.
    #[must_use]
    pub const fn phase(&self) -> DutyPhase {
        self.phase
    }
}

/// Performs duties over the capabilities of administered resources.
pub trait Administrator: Send + Sync {
    /// Perform `duty`. Capabilities are in the binding's resource order.
    ///
    /// # Errors
    ///
    /// Any error fails the invocation's current step; duties are not retried.
    fn administer(&self, duty: &Duty, capabilities: &[Capability]) -> AppResult<()>;
}

impl<F> Administrator for F
where
    F: Fn(&Duty, &[Capability]) -> AppResult<()> + Send + Sync,
{
    fn administer(&self, duty: &Duty, capabilities: &[Capability]) -> AppResult<()> {
        self(duty, capabilities)
    }
}

/// Pairs an administrator's duty with the resources it inspects and the capability it
/// requires each of them to expose.
#[derive(Clone)]
pub struct AdministeredResourceBinding {
    duty: Duty,
    administrator: Arc<dyn Administrator>,
    resources: Vec<ResourceIndex>,
    capability: TypeId,
    capability_name: &'static str,
}

impl AdministeredResourceBinding {
    /// Bind `administrator` to perform `duty` over capability `C` of `resources`.
    pub fn new<C: Any>(
        duty: Duty,
        administrator: impl Administrator + 'static,
        resources: impl IntoIterator<Item = ResourceIndex>,
    ) -> Self {
        Self {
            duty,
            administrator: Arc::new(administrator),
            resources: resources.into_iter().collect(),
            capability: TypeId::of::<C>(),
            capability_name: type_name::<C>(),
        }
    }

    /// The bound duty.
    #[must_use]
    pub const fn duty(&self) -> &Duty {
        &self.duty
    }

    /// Administered resources, in the order capabilities are passed.
    #[must_use]
    pub fn resources(&self) -> &[ResourceIndex] {
        &self.resources
    }

    /// Required capability type.
    #[must_use]
    pub const fn capability(&self) -> TypeId {
        self.capability
    }

    /// Required capability type name.
    #[must_use]
    pub const fn capability_name(&self) -> &'static str {
        self.capability_name
    }
}

impl fmt::Debug for AdministeredResourceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdministeredResourceBinding")
            .field("duty", &self.duty)
            .field("resources", &self.resources)
            .field("capability", &self.capability_name)
            .finish_non_exhaustive()
    }
}

/// Bind-time validation of a duty binding.
///
/// Every administered resource must be required by the invocation and its type must
/// supply the binding's capability.
pub(crate) fn validate_binding<'a>(
    binding: &AdministeredResourceBinding,
    required: &[ResourceIndex],
    lookup: impl Fn(ResourceIndex) -> Option<&'a Arc<ResourceDefinition>>,
    registry: &CapabilityRegistry,
) -> Result<(), KernelError> {
    for &index in &binding.resources {
        if !required.contains(&index) {
            return Err(KernelError::InvalidResourceIndex {
                index,
                reason: format!("administered by duty `{}` but not required", binding.duty.name),
            });
        }
        let definition = lookup(index).ok_or_else(|| KernelError::InvalidResourceIndex {
            index,
            reason: "no resource compiled at this slot".into(),
        })?;
        if !registry.supports(definition.resource_type(), binding.capability) {
            return Err(KernelError::MissingCapability {
                resource: definition.name().to_owned(),
                capability: binding.capability_name,
                duty: binding.duty.name.clone(),
            });
        }
    }
    Ok(())
}

/// Runs duty passes over resource capabilities.
pub struct AdministrationExecutor<'a> {
    registry: &'a CapabilityRegistry,
}

impl<'a> AdministrationExecutor<'a> {
    /// Create an executor over `registry`.
    #[must_use]
    pub const fn new(registry: &'a CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// Extract the binding's capability from one administered resource.
    ///
    /// Callers hold the resource's scope lock while this runs.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::MissingCapability`] if the resource cannot supply it,
    /// which only happens when metadata bypassed bind-time validation.
    pub fn resolve(
        &self,
        binding: &AdministeredResourceBinding,
        name: &str,
        resource: &dyn Resource,
    ) -> Result<Capability, KernelError> {
        self.registry
            .extract(resource, binding.capability)
            .ok_or_else(|| KernelError::MissingCapability {
                resource: name.to_owned(),
                capability: binding.capability_name,
                duty: binding.duty.name.clone(),
            })
    }

    /// Invoke the administrator with the resolved capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Administration`] carrying the administrator's failure.
    pub fn execute(
        &self,
        binding: &AdministeredResourceBinding,
        capabilities: &[Capability],
    ) -> Result<(), KernelError> {
        debug!(
            duty = %binding.duty.name,
            resources = capabilities.len(),
            "administering duty"
        );
        binding
            .administrator
            .administer(&binding.duty, capabilities)
            .map_err(|err| KernelError::Administration {
                duty: binding.duty.name.clone(),
                cause: format!("{err:#}"),
            })
    }
}
