//! Configuration models for the executive, its worker pools, and the invocation driver.

pub mod executive;
pub mod pool;

pub use executive::{DriverConfig, ExecutiveConfig, KernelConfig, ENV_PREFIX};
pub use pool::WorkerPoolConfig;
