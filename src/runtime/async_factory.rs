//! Asynchronous resource factories.
//!
//! A container never awaits: its factory receives a [`LoadCompletion`] and settles it
//! whenever creation finishes. [`SpawnedFactory`] bridges an async constructor to that
//! protocol by spawning the construction on a runtime and settling the handle from
//! the spawned task.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::core::error::ResourceError;
use crate::core::metadata::ResourceDefinition;
use crate::core::resource::{LoadCompletion, Resource, ResourceFactory, Spawn};

/// Creates a resource asynchronously.
#[async_trait]
pub trait AsyncResourceFactory: Send + Sync + 'static {
    /// The resource created.
    type Resource: Resource;

    /// Create the resource.
    ///
    /// # Errors
    ///
    /// The failure settles the container as failed; creation is never retried.
    async fn create(&self) -> Result<Self::Resource, ResourceError>;
}

/// Adapts an [`AsyncResourceFactory`] to [`ResourceFactory`] by spawning each creation.
pub struct SpawnedFactory<F, S> {
    factory: Arc<F>,
    spawner: S,
}

impl<F, S> SpawnedFactory<F, S>
where
    F: AsyncResourceFactory,
    S: Spawn + Send + Sync + 'static,
{
    /// Spawn `factory`'s creations with `spawner`.
    pub fn new(factory: F, spawner: S) -> Self {
        Self {
            factory: Arc::new(factory),
            spawner,
        }
    }

    /// Resource definition named `name` created by this factory.
    pub fn into_definition(self, name: impl Into<String>) -> ResourceDefinition {
        ResourceDefinition::new::<F::Resource>(name, self)
    }
}

impl<F, S> ResourceFactory for SpawnedFactory<F, S>
where
    F: AsyncResourceFactory,
    S: Spawn + Send + Sync,
{
    fn create(&self, completion: LoadCompletion) {
        let factory = Arc::clone(&self.factory);
        debug!(resource = %completion.resource_name(), "spawning async resource creation");
        self.spawner.spawn(async move {
            match AsyncResourceFactory::create(factory.as_ref()).await {
                Ok(resource) => completion.complete(resource),
                Err(cause) => completion.fail(cause),
            }
        });
    }
}
