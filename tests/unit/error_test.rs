//! Tests for error types

use prometheus_kernel::core::{KernelError, PoolError, ResourceError, ResourceIndex};

#[test]
fn test_pool_error_display() {
    assert_eq!(PoolError::QueueFull.to_string(), "job queue is full");
    assert_eq!(PoolError::NotStarted.to_string(), "pool has not been started");
    assert_eq!(PoolError::PoolShutdown.to_string(), "pool has been shut down");
    assert_eq!(
        PoolError::UnknownCore { core: 5, cores: 2 }.to_string(),
        "no pool for core 5: 2 cores managed"
    );
    assert_eq!(
        PoolError::InvalidConfig("bad".into()).to_string(),
        "invalid configuration: bad"
    );
}

#[test]
fn test_pool_error_converts_transparently() {
    let err: KernelError = PoolError::Timeout.into();
    assert_eq!(err, KernelError::Pool(PoolError::Timeout));
    assert_eq!(err.to_string(), "operation timed out");
}

#[test]
fn test_kernel_error_display_names_resource() {
    let err = KernelError::ResourceLoad {
        resource: "db".into(),
        cause: ResourceError::new("refused"),
    };
    assert_eq!(err.to_string(), "resource `db` failed to load: refused");

    let err = KernelError::DependencyNotReady {
        resource: "conn".into(),
        dependency: ResourceIndex::process(0),
    };
    assert!(err.to_string().starts_with("resource `conn` depends on"));
}

#[test]
fn test_configuration_errors_are_classified() {
    let missing = KernelError::MissingCapability {
        resource: "conn".into(),
        capability: "Transaction",
        duty: "begin".into(),
    };
    assert!(missing.is_configuration());
    assert!(KernelError::Configuration("x".into()).is_configuration());
    assert!(!KernelError::NotReady {
        resource: "conn".into(),
        state: "loading",
    }
    .is_configuration());
}

#[test]
fn test_resource_error_from_str() {
    let err: ResourceError = "timeout".into();
    assert_eq!(err.message(), "timeout");
    assert_eq!(err.to_string(), "timeout");
}
