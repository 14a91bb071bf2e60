//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use prometheus_kernel::config::{DriverConfig, ExecutiveConfig, KernelConfig, WorkerPoolConfig};

#[test]
fn test_defaults_are_valid() {
    let cfg = KernelConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.executive.threads_per_cpu, 1);
    assert!(cfg.executive.pin_threads);
    assert_eq!(cfg.executive.shutdown_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.driver.poll_interval(), Duration::from_millis(5));
}

#[test]
fn test_worker_pool_config_invalid_worker_count() {
    let invalid = WorkerPoolConfig::new().with_worker_count(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_worker_pool_config_invalid_queue_depth() {
    let invalid = WorkerPoolConfig::new().with_max_queue_depth(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_worker_pool_config_small_stack_rejected() {
    let invalid = WorkerPoolConfig::new().with_thread_stack_size(4 * 1024);
    assert!(invalid.validate().unwrap_err().contains("thread_stack_size"));
}

#[test]
fn test_executive_config_invalid_threads_per_cpu() {
    let invalid = ExecutiveConfig {
        threads_per_cpu: 0,
        ..ExecutiveConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_executive_config_blank_strategy_rejected() {
    let invalid = ExecutiveConfig {
        strategy_name: "  ".into(),
        ..ExecutiveConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_driver_config_zero_poll_interval_rejected() {
    assert!(DriverConfig { poll_interval_ms: 0 }.validate().is_err());
}

#[test]
fn test_from_json_str_fills_missing_fields() {
    let cfg = KernelConfig::from_json_str(
        r#"{ "executive": { "threads_per_cpu": 2, "pin_threads": false }, "driver": { "poll_interval_ms": 10 } }"#,
    )
    .unwrap();
    assert_eq!(cfg.executive.threads_per_cpu, 2);
    assert!(!cfg.executive.pin_threads);
    assert_eq!(cfg.executive.strategy_name, "core-affinity");
    assert_eq!(cfg.driver.poll_interval_ms, 10);
}

#[test]
fn test_from_json_str_reports_section() {
    let err = KernelConfig::from_json_str(r#"{ "driver": { "poll_interval_ms": 0 } }"#).unwrap_err();
    assert!(err.starts_with("driver invalid"));

    let err = KernelConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_from_vars_rejects_bad_flag() {
    let vars: HashMap<&str, &str> = [("KERNEL_PIN_THREADS", "maybe")].into_iter().collect();
    let err = KernelConfig::from_vars(|key| vars.get(key).map(|v| (*v).to_owned())).unwrap_err();
    assert!(err.starts_with("KERNEL_PIN_THREADS=\"maybe\""));
}

#[test]
fn test_config_serde_roundtrip_preserves_values() {
    let cfg = KernelConfig {
        executive: ExecutiveConfig {
            thread_name_prefix: "edge".into(),
            ..ExecutiveConfig::default()
        },
        driver: DriverConfig { poll_interval_ms: 1 },
    };
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(KernelConfig::from_json_str(&json).unwrap(), cfg);
}
