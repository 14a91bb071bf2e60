//! Executive, driver, and root kernel configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::pool::WorkerPoolConfig;

/// Prefix of the environment variables read by [`KernelConfig::from_env`].
pub const ENV_PREFIX: &str = "KERNEL_";

/// Configuration of the CPU-affinity executive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutiveConfig {
    /// Worker threads spawned per logical CPU.
    pub threads_per_cpu: usize,
    /// Queue bound of each per-core pool.
    pub max_queue_depth: usize,
    /// Bound on awaiting each pool during `stop_managing`, in milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Stack size of every executive thread, in bytes.
    pub thread_stack_size: usize,
    /// Name of the execution strategy holding every thread factory.
    pub strategy_name: String,
    /// Prefix of executive thread names.
    pub thread_name_prefix: String,
    /// Whether worker threads are pinned to their logical CPU.
    pub pin_threads: bool,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        let pool = WorkerPoolConfig::default();
        Self {
            threads_per_cpu: 1,
            max_queue_depth: pool.max_queue_depth,
            shutdown_timeout_ms: 5_000,
            thread_stack_size: pool.thread_stack_size,
            strategy_name: "core-affinity".into(),
            thread_name_prefix: "kernel".into(),
            pin_threads: true,
        }
    }
}

impl ExecutiveConfig {
    /// Shutdown bound as a duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Configuration of the pool serving a core with `logical_cpus` logical CPUs.
    #[must_use]
    pub fn core_pool(&self, logical_cpus: usize) -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_worker_count(logical_cpus.max(1) * self.threads_per_cpu)
            .with_max_queue_depth(self.max_queue_depth)
            .with_thread_stack_size(self.thread_stack_size)
    }

    /// Validate executive configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.threads_per_cpu == 0 {
            return Err("threads_per_cpu must be greater than 0".into());
        }
        if self.shutdown_timeout_ms == 0 {
            return Err("shutdown_timeout_ms must be greater than 0".into());
        }
        if self.strategy_name.trim().is_empty() {
            return Err("strategy_name must not be empty".into());
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        self.core_pool(1).validate()
    }
}

/// Configuration of the invocation driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Delay before a pending invocation is driven again, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 5 }
    }
}

impl DriverConfig {
    /// Poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate driver configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root kernel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Executive settings.
    pub executive: ExecutiveConfig,
    /// Invocation driver settings.
    pub driver: DriverConfig,
}

impl KernelConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field, prefixed by its section.
    pub fn validate(&self) -> Result<(), String> {
        self.executive
            .validate()
            .map_err(|e| format!("executive invalid: {e}"))?;
        self.driver
            .validate()
            .map_err(|e| format!("driver invalid: {e}"))
    }

    /// Parse kernel configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `KERNEL_*` environment variables, after loading a `.env`
    /// file if one exists.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or a validation
    /// message.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by variables resolved through `lookup`.
    ///
    /// Keys are the field names upper-cased with the `KERNEL_` prefix, for example
    /// `KERNEL_THREADS_PER_CPU` or `KERNEL_POLL_INTERVAL_MS`.
    ///
    /// # Errors
    ///
    /// Same as [`KernelConfig::from_env`].
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = Self::default();
        let exec = &mut cfg.executive;
        override_with(&lookup, "THREADS_PER_CPU", &mut exec.threads_per_cpu)?;
        override_with(&lookup, "MAX_QUEUE_DEPTH", &mut exec.max_queue_depth)?;
        override_with(&lookup, "SHUTDOWN_TIMEOUT_MS", &mut exec.shutdown_timeout_ms)?;
        override_with(&lookup, "THREAD_STACK_SIZE", &mut exec.thread_stack_size)?;
        override_with(&lookup, "STRATEGY_NAME", &mut exec.strategy_name)?;
        override_with(&lookup, "THREAD_NAME_PREFIX", &mut exec.thread_name_prefix)?;
        override_with(&lookup, "PIN_THREADS", &mut exec.pin_threads)?;
        override_with(&lookup, "POLL_INTERVAL_MS", &mut cfg.driver.poll_interval_ms)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn override_with<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    field: &mut T,
) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{name}");
    if let Some(raw) = lookup(&key) {
        *field = raw
            .trim()
            .parse()
            .map_err(|e| format!("{key}={raw:?}: {e}"))?;
    }
    Ok(())
}
