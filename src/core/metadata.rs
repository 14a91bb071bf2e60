//! Compiled metadata consumed by the kernel.
//!
//! The configuration compiler that normally produces this graph lives outside the
//! kernel; [`MetadataBuilder`] plays its role and performs the bind-time validation:
//! invalid indices, unsatisfiable dependencies and missing capabilities are reported
//! here, before any job runs.

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::core::administration::{validate_binding, AdministeredResourceBinding, DutyPhase};
use crate::core::capability::CapabilityRegistry;
use crate::core::error::{AppResult, KernelError};
use crate::core::index::{ResourceIndex, ResourceScope};
use crate::core::invocation::InvocationContext;
use crate::core::resource::{Resource, ResourceFactory};

/// Compiled description of one resource binding.
pub struct ResourceDefinition {
    name: String,
    factory: Arc<dyn ResourceFactory>,
    resource_type: TypeId,
    resource_type_name: &'static str,
    dependencies: Vec<ResourceIndex>,
}

impl ResourceDefinition {
    /// Define a resource of type `R` created by `factory`.
    pub fn new<R: Resource>(name: impl Into<String>, factory: impl ResourceFactory + 'static) -> Self {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            resource_type: TypeId::of::<R>(),
            resource_type_name: type_name::<R>(),
            dependencies: Vec::new(),
        }
    }

    /// Declare a dependency on another resource's object.
    #[must_use]
    pub fn with_dependency(mut self, dependency: ResourceIndex) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Factory creating the resource.
    #[must_use]
    pub fn factory(&self) -> &Arc<dyn ResourceFactory> {
        &self.factory
    }

    /// Type of the resource the factory settles with.
    #[must_use]
    pub const fn resource_type(&self) -> TypeId {
        self.resource_type
    }

    /// Type name of the resource, for diagnostics.
    #[must_use]
    pub const fn resource_type_name(&self) -> &'static str {
        self.resource_type_name
    }

    /// Declared dependencies in order.
    #[must_use]
    pub fn dependencies(&self) -> &[ResourceIndex] {
        &self.dependencies
    }
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("name", &self.name)
            .field("resource_type", &self.resource_type_name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Resource definitions of one scope, in slot order.
pub type ScopeDefinitions = Arc<[Arc<ResourceDefinition>]>;

/// Body of an invocation.
pub type InvocationBody = Arc<dyn Fn(&InvocationContext<'_>) -> AppResult<()> + Send + Sync>;

/// Compiled description of one invocation type.
pub struct InvocationMetadata {
    name: String,
    resources: ScopeDefinitions,
    required: Vec<ResourceIndex>,
    pre_duties: Vec<AdministeredResourceBinding>,
    post_duties: Vec<AdministeredResourceBinding>,
    body: InvocationBody,
    next: Option<String>,
}

impl InvocationMetadata {
    /// Invocation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invocation-scope resource definitions.
    #[must_use]
    pub fn resources(&self) -> &ScopeDefinitions {
        &self.resources
    }

    /// Resources the invocation requires, in load order.
    #[must_use]
    pub fn required(&self) -> &[ResourceIndex] {
        &self.required
    }

    /// Duties run before the body.
    #[must_use]
    pub fn pre_duties(&self) -> &[AdministeredResourceBinding] {
        &self.pre_duties
    }

    /// Duties run after the body.
    #[must_use]
    pub fn post_duties(&self) -> &[AdministeredResourceBinding] {
        &self.post_duties
    }

    /// The invocation body.
    #[must_use]
    pub fn body(&self) -> &InvocationBody {
        &self.body
    }

    /// Invocation continued in the same thread-of-control once this one completes.
    #[must_use]
    pub fn next(&self) -> Option<&str> {
        self.next.as_deref()
    }
}

impl fmt::Debug for InvocationMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationMetadata")
            .field("name", &self.name)
            .field("resources", &self.resources)
            .field("required", &self.required)
            .field("pre_duties", &self.pre_duties.len())
            .field("post_duties", &self.post_duties.len())
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

/// The compiled graph: shared scope definitions plus every invocation type.
#[derive(Debug)]
pub struct KernelMetadata {
    process: ScopeDefinitions,
    thread: ScopeDefinitions,
    invocations: HashMap<String, Arc<InvocationMetadata>>,
    capabilities: Arc<CapabilityRegistry>,
}

impl KernelMetadata {
    /// Process-scope resource definitions.
    #[must_use]
    pub fn process_resources(&self) -> &ScopeDefinitions {
        &self.process
    }

    /// Thread-scope resource definitions.
    #[must_use]
    pub fn thread_resources(&self) -> &ScopeDefinitions {
        &self.thread
    }

    /// Look up an invocation by name.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownInvocation`] if no such invocation was compiled.
    pub fn invocation(&self, name: &str) -> Result<&Arc<InvocationMetadata>, KernelError> {
        self.invocations
            .get(name)
            .ok_or_else(|| KernelError::UnknownInvocation(name.to_owned()))
    }

    /// Names of every compiled invocation.
    pub fn invocation_names(&self) -> impl Iterator<Item = &str> {
        self.invocations.keys().map(String::as_str)
    }

    /// Capability registry used by administration.
    #[must_use]
    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }
}

/// Builder for one invocation type.
pub struct InvocationBuilder {
    name: String,
    resources: Vec<ResourceDefinition>,
    required: Vec<ResourceIndex>,
    pre_duties: Vec<AdministeredResourceBinding>,
    post_duties: Vec<AdministeredResourceBinding>,
    body: InvocationBody,
    next: Option<String>,
}

impl InvocationBuilder {
    /// Start describing an invocation with its body.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&InvocationContext<'_>) -> AppResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            resources: Vec::new(),
            required: Vec::new(),
            pre_duties: Vec::new(),
            post_duties: Vec::new(),
            body: Arc::new(body),
            next: None,
        }
    }

    /// Add an invocation-scope resource and require it. Returns its index.
    pub fn invocation_resource(&mut self, definition: ResourceDefinition) -> ResourceIndex {
        let index = ResourceIndex::invocation(self.resources.len());
        self.resources.push(definition);
        self.required.push(index);
        index
    }

    /// Require a process- or thread-scope resource. Order of calls is load order.
    pub fn require(&mut self, index: ResourceIndex) -> &mut Self {
        self.required.push(index);
        self
    }

    /// Bind a duty run before or after the body, according to its phase.
    pub fn duty(&mut self, binding: AdministeredResourceBinding) -> &mut Self {
        match binding.duty().phase() {
            DutyPhase::Pre => self.pre_duties.push(binding),
            DutyPhase::Post => self.post_duties.push(binding),
        }
        self
    }

    /// Continue with `next` in the same thread-of-control on completion.
    pub fn then(&mut self, next: impl Into<String>) -> &mut Self {
        self.next = Some(next.into());
        self
    }
}

/// Assembles and validates [`KernelMetadata`].
#[derive(Default)]
pub struct MetadataBuilder {
    process: Vec<ResourceDefinition>,
    thread: Vec<ResourceDefinition>,
    invocations: Vec<InvocationBuilder>,
}

impl MetadataBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a process-scope resource. Returns its index.
    pub fn process_resource(&mut self, definition: ResourceDefinition) -> ResourceIndex {
        self.process.push(definition);
        ResourceIndex::process(self.process.len() - 1)
    }

    /// Add a thread-scope resource. Returns its index.
    pub fn thread_resource(&mut self, definition: ResourceDefinition) -> ResourceIndex {
        self.thread.push(definition);
        ResourceIndex::thread(self.thread.len() - 1)
    }

    /// Add an invocation type.
    pub fn invocation(&mut self, invocation: InvocationBuilder) -> &mut Self {
        self.invocations.push(invocation);
        self
    }

    /// Validate and compile the graph, binding duties against `capabilities`.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found: an index outside its scope, a
    /// resource required twice, a dependency that is narrower-scoped or not required
    /// before its dependent, a missing capability, or an unknown `next` invocation.
    pub fn build(self, capabilities: CapabilityRegistry) -> Result<KernelMetadata, KernelError> {
        let process: ScopeDefinitions = self.process.into_iter().map(Arc::new).collect();
        let thread: ScopeDefinitions = self.thread.into_iter().map(Arc::new).collect();
        let names: HashSet<String> = self.invocations.iter().map(|i| i.name.clone()).collect();

        let mut invocations = HashMap::with_capacity(self.invocations.len());
        for builder in self.invocations {
            let resources: ScopeDefinitions = builder.resources.into_iter().map(Arc::new).collect();
            let lookup = |index: ResourceIndex| match index.scope {
                ResourceScope::Process => process.get(index.slot),
                ResourceScope::Thread => thread.get(index.slot),
                ResourceScope::Invocation => resources.get(index.slot),
            };

            validate_required(&builder.required, lookup)?;
            for binding in builder.pre_duties.iter().chain(&builder.post_duties) {
                validate_binding(binding, &builder.required, lookup, &capabilities)?;
            }
            if let Some(next) = &builder.next {
                if !names.contains(next) {
                    return Err(KernelError::UnknownInvocation(next.clone()));
                }
            }

            let metadata = InvocationMetadata {
                name: builder.name.clone(),
                resources,
                required: builder.required,
                pre_duties: builder.pre_duties,
                post_duties: builder.post_duties,
                body: builder.body,
                next: builder.next,
            };
            if invocations.insert(builder.name.clone(), Arc::new(metadata)).is_some() {
                return Err(KernelError::Configuration(format!(
                    "invocation `{}` defined twice",
                    builder.name
                )));
            }
        }

        Ok(KernelMetadata {
            process,
            thread,
            invocations,
            capabilities: Arc::new(capabilities),
        })
    }
}

fn validate_required<'a>(
    required: &[ResourceIndex],
    lookup: impl Fn(ResourceIndex) -> Option<&'a Arc<ResourceDefinition>>,
) -> Result<(), KernelError> {
    let mut seen = HashSet::with_capacity(required.len());
    for &index in required {
        let definition = lookup(index).ok_or_else(|| KernelError::InvalidResourceIndex {
            index,
            reason: "no resource compiled at this slot".into(),
        })?;
        for &dependency in definition.dependencies() {
            if !index.scope.may_depend_on(dependency.scope) {
                return Err(KernelError::InvalidDependency {
                    resource: definition.name().to_owned(),
                    dependency,
                    reason: format!("a {} resource cannot outlive its dependency", index.scope),
                });
            }
            if !seen.contains(&dependency) {
                return Err(KernelError::InvalidDependency {
                    resource: definition.name().to_owned(),
                    dependency,
                    reason: "dependency must be required before its dependent".into(),
                });
            }
        }
        if !seen.insert(index) {
            return Err(KernelError::InvalidResourceIndex {
                index,
                reason: "required more than once".into(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::{sync_factory, ValueResource};

    fn value(name: &str) -> ResourceDefinition {
        ResourceDefinition::new::<ValueResource<u32>>(name, sync_factory(|| Ok(ValueResource::new(1_u32))))
    }

    fn noop(name: &str) -> InvocationBuilder {
        InvocationBuilder::new(name, |_ctx: &InvocationContext<'_>| Ok(()))
    }

    #[test]
    fn test_build_resolves_invocations() {
        let mut builder = MetadataBuilder::new();
        let pool = builder.process_resource(value("pool"));
        let mut handler = noop("handle");
        handler.require(pool);
        let conn = handler.invocation_resource(value("conn").with_dependency(pool));
        builder.invocation(handler);

        let metadata = builder.build(CapabilityRegistry::new()).unwrap();
        let handle = metadata.invocation("handle").unwrap();
        assert_eq!(handle.required(), &[pool, conn]);
        assert_eq!(metadata.process_resources().len(), 1);
        assert!(metadata.invocation("missing").is_err());
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let mut builder = MetadataBuilder::new();
        let mut handler = noop("handle");
        handler.require(ResourceIndex::thread(3));
        builder.invocation(handler);

        let err = builder.build(CapabilityRegistry::new()).unwrap_err();
        assert!(matches!(err, KernelError::InvalidResourceIndex { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_dependency_must_precede_dependent() {
        let mut builder = MetadataBuilder::new();
        let pool = builder.process_resource(value("pool"));
        let mut handler = noop("handle");
        handler.invocation_resource(value("conn").with_dependency(pool));
        handler.require(pool);
        builder.invocation(handler);

        let err = builder.build(CapabilityRegistry::new()).unwrap_err();
        assert!(matches!(err, KernelError::InvalidDependency { .. }));
    }

    #[test]
    fn test_wider_scope_cannot_depend_on_narrower() {
        let mut builder = MetadataBuilder::new();
        let session = builder.thread_resource(value("session"));
        let cache = builder.process_resource(value("cache").with_dependency(session));
        let mut handler = noop("handle");
        handler.require(session).require(cache);
        builder.invocation(handler);

        let err = builder.build(CapabilityRegistry::new()).unwrap_err();
        assert!(matches!(err, KernelError::InvalidDependency { .. }));
    }

    #[test]
    fn test_unknown_next_rejected() {
        let mut builder = MetadataBuilder::new();
        let mut handler = noop("handle");
        handler.then("respond");
        builder.invocation(handler);

        let err = builder.build(CapabilityRegistry::new()).unwrap_err();
        assert_eq!(err, KernelError::UnknownInvocation("respond".into()));
    }
}
