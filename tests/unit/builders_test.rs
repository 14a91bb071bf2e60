//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use prometheus_kernel::builders::{build_driver, ExecutiveBuilder, INVOCATION_TEAM};
use prometheus_kernel::config::{DriverConfig, ExecutiveConfig};
use prometheus_kernel::core::{CapabilityRegistry, InvocationBuilder, InvocationContext, KernelError, MetadataBuilder};
use prometheus_kernel::executive::CpuTopology;

fn unpinned() -> ExecutiveConfig {
    ExecutiveConfig {
        pin_threads: false,
        thread_stack_size: 256 * 1024,
        ..ExecutiveConfig::default()
    }
}

#[test]
fn test_executive_builder_uses_given_topology() {
    let executive = ExecutiveBuilder::new(unpinned())
        .with_topology(CpuTopology::from_core_layout(vec![vec![0, 1], vec![2, 3]]).unwrap())
        .build()
        .unwrap();
    assert_eq!(executive.core_count(), 2);
    assert_eq!(executive.thread_factory_count(), 4);
    assert!(executive.stop_managing().all_terminated());
}

#[test]
fn test_executive_builder_rejects_invalid_config() {
    let config = ExecutiveConfig {
        threads_per_cpu: 0,
        ..unpinned()
    };
    let err = ExecutiveBuilder::new(config)
        .with_topology(CpuTopology::from_core_layout(vec![vec![0]]).unwrap())
        .build()
        .unwrap_err();
    assert!(matches!(err, KernelError::Configuration(_)));
}

#[test]
fn test_build_driver_runs_invocations() {
    let executive = Arc::new(
        ExecutiveBuilder::new(unpinned())
            .with_topology(CpuTopology::from_core_layout(vec![vec![0]]).unwrap())
            .build()
            .unwrap(),
    );
    let mut metadata = MetadataBuilder::new();
    metadata.invocation(InvocationBuilder::new("ping", |_ctx: &InvocationContext<'_>| Ok(())));
    let metadata = metadata.build(CapabilityRegistry::new()).unwrap();

    let driver = build_driver(Arc::clone(&executive), metadata, &DriverConfig::default()).unwrap();
    assert!(format!("{driver:?}").contains(INVOCATION_TEAM));
    let report = driver.invoke("ping").unwrap().wait(Duration::from_secs(10)).unwrap();
    assert_eq!(report.invocations, ["ping"]);
    assert!(executive.stop_managing().all_terminated());
}

#[test]
fn test_build_driver_rejects_invalid_config() {
    let executive = Arc::new(
        ExecutiveBuilder::new(unpinned())
            .with_topology(CpuTopology::from_core_layout(vec![vec![0]]).unwrap())
            .build()
            .unwrap(),
    );
    let metadata = MetadataBuilder::new().build(CapabilityRegistry::new()).unwrap();
    let err = build_driver(Arc::clone(&executive), metadata, &DriverConfig { poll_interval_ms: 0 }).unwrap_err();
    assert!(err.is_configuration());
    executive.stop_managing();
}
