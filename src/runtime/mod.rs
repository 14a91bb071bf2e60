//! Runtime adapters for asynchronous resource creation.

pub mod async_factory;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_spawner;

pub use async_factory::{AsyncResourceFactory, SpawnedFactory};
#[cfg(feature = "tokio-runtime")]
pub use tokio_spawner::TokioSpawner;
