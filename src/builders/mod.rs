//! Builders to construct kernel components from configuration.

pub mod executive_builder;

pub use executive_builder::{build_driver, ExecutiveBuilder, INVOCATION_TEAM};
