//! Tests for utility functions

use prometheus_kernel::util::telemetry::{init_tracing, init_tracing_with_default};

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing_with_default("prometheus_kernel=debug");
    init_tracing();
    init_tracing_with_default("warn");
    tracing::info!(target: "prometheus_kernel", "tracing initialized");
}
