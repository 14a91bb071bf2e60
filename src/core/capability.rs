//! Registry of resource capabilities used by administration.
//!
//! Maps `(resource type, capability type)` to an extraction function. It is populated
//! once before binding and queried without reflection afterwards.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::resource::Resource;

/// A capability object extracted from a resource.
pub type Capability = Arc<dyn Any + Send + Sync>;

type Extractor = Arc<dyn Fn(&dyn Any) -> Option<Capability> + Send + Sync>;

/// Compile-time registry of the capabilities each resource type exposes.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    extractors: HashMap<(TypeId, TypeId), Extractor>,
    labels: Vec<(&'static str, &'static str)>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register how resource type `R` supplies capability `C`.
    pub fn register<R, C, F>(&mut self, extract: F) -> &mut Self
    where
        R: Resource,
        C: Any + Send + Sync,
        F: Fn(&R) -> C + Send + Sync + 'static,
    {
        let extractor: Extractor = Arc::new(move |resource: &dyn Any| {
            resource
                .downcast_ref::<R>()
                .map(|resource| Arc::new(extract(resource)) as Capability)
        });
        self.extractors
            .insert((TypeId::of::<R>(), TypeId::of::<C>()), extractor);
        self.labels.push((type_name::<R>(), type_name::<C>()));
        self
    }

    /// Whether `resource_type` has a registered extractor for `capability`.
    #[must_use]
    pub fn supports(&self, resource_type: TypeId, capability: TypeId) -> bool {
        self.extractors.contains_key(&(resource_type, capability))
    }

    /// Extract `capability` from a live resource.
    #[must_use]
    pub fn extract(&self, resource: &dyn Resource, capability: TypeId) -> Option<Capability> {
        let resource: &dyn Any = resource;
        let extractor = self.extractors.get(&(resource.type_id(), capability))?;
        extractor(resource)
    }

    /// Number of registered `(resource, capability)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.labels.iter()).finish()
    }
}
