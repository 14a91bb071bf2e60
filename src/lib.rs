//! # Prometheus Kernel
//!
//! A dependency-injection execution kernel: scoped resource containers, a work
//! coordinator, administration duties, and a CPU-affinity executive that runs every job
//! of a process on the same core.
//!
//! ## Core Problem Solved
//!
//! Server applications bind externally supplied resources (connection pools, sessions,
//! transactions) into invocations that run on worker threads. The kernel owns:
//!
//! - **Scoped Lifetimes**: process, thread, and invocation scopes, each unloading its
//!   resources when it ends
//! - **Non-Blocking Loading**: factories settle synchronously or later; a pending
//!   invocation parks itself instead of blocking its worker
//! - **Dependency Coordination**: resources receive their dependencies' objects once
//!   everything they need is ready
//! - **Administration**: duties such as begin/commit run over resource capabilities
//!   around the invocation body
//! - **Core Affinity**: one pinned worker pool and one scheduled pool per physical core
//!
//! ## Running Invocations
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use prometheus_kernel::builders::{build_driver, ExecutiveBuilder};
//! use prometheus_kernel::config::KernelConfig;
//! use prometheus_kernel::core::{
//!     sync_factory, CapabilityRegistry, InvocationBuilder, InvocationContext, MetadataBuilder,
//!     ResourceDefinition, ValueResource,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = KernelConfig::from_env()?;
//!
//! let mut metadata = MetadataBuilder::new();
//! let greeting = metadata.process_resource(ResourceDefinition::new::<ValueResource<String>>(
//!     "greeting",
//!     sync_factory(|| Ok(ValueResource::new("hello".to_owned()))),
//! ));
//! let mut hello = InvocationBuilder::new("hello", |ctx: &InvocationContext<'_>| {
//!     let greeting = ctx.object::<String>(0).ok_or_else(|| anyhow::anyhow!("no greeting"))?;
//!     tracing::info!(%greeting, "invoked");
//!     Ok(())
//! });
//! hello.require(greeting);
//! metadata.invocation(hello);
//! let metadata = metadata.build(CapabilityRegistry::new())?;
//!
//! let executive = Arc::new(ExecutiveBuilder::new(config.executive.clone()).build()?);
//! let driver = build_driver(Arc::clone(&executive), metadata, &config.driver)?;
//! driver.invoke("hello")?.wait(Duration::from_secs(5))?;
//!
//! let report = executive.stop_managing();
//! assert!(report.all_terminated());
//! # Ok(())
//! # }
//! ```
//!
//! For complete examples, see:
//! - `tests/driver_test.rs` - End-to-end invocation chains
//! - `tests/executive_test.rs` - Core routing and shutdown

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core kernel abstractions: containers, scopes, coordination, jobs and pools.
pub mod core;
/// Configuration models for the executive, pools and the invocation driver.
pub mod config;
/// Builders to construct kernel components from configuration.
pub mod builders;
/// CPU topology, thread affinity and the per-core executive.
pub mod executive;
/// Runtime adapters for asynchronous resource creation.
pub mod runtime;
/// Shared utilities.
pub mod util;
