//! Binding OS threads to CPUs and remembering which core a thread serves.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::core::job::CoreAffinity;

/// Errors raised while binding a thread to CPUs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AffinityError {
    /// The mask names no CPU.
    #[error("cpu mask is empty")]
    EmptyMask,

    /// The platform offers no thread affinity control.
    #[error("thread affinity is not supported on this platform")]
    Unsupported,

    /// The OS rejected the request.
    #[error("binding to cpus {mask} failed: {message}")]
    Os {
        /// Requested mask.
        mask: String,
        /// OS error text.
        message: String,
    },
}

/// Set of logical CPU ids a thread may run on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuMask(BTreeSet<usize>);

impl CpuMask {
    /// Mask over `cpus`.
    pub fn new(cpus: impl IntoIterator<Item = usize>) -> Self {
        Self(cpus.into_iter().collect())
    }

    /// Mask holding a single CPU.
    #[must_use]
    pub fn single(cpu: usize) -> Self {
        Self::new([cpu])
    }

    /// CPU ids in ascending order.
    pub fn cpus(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Whether `cpu` is in the mask.
    #[must_use]
    pub fn contains(&self, cpu: usize) -> bool {
        self.0.contains(&cpu)
    }

    /// Number of CPUs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the mask is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, cpu) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{cpu}")?;
        }
        f.write_str("]")
    }
}

/// Binds the calling thread to a CPU mask.
pub trait AffinityBinder: Send + Sync {
    /// Restrict the calling thread to `mask`.
    ///
    /// # Errors
    ///
    /// Returns an [`AffinityError`] if the binding could not be applied. Callers log it
    /// and carry on unpinned.
    fn bind_current_thread(&self, mask: &CpuMask) -> Result<(), AffinityError>;
}

/// Binder backed by the OS scheduler (`sched_setaffinity` on Linux).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsAffinityBinder;

impl AffinityBinder for OsAffinityBinder {
    #[cfg(target_os = "linux")]
    fn bind_current_thread(&self, mask: &CpuMask) -> Result<(), AffinityError> {
        use nix::sched::{sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        if mask.is_empty() {
            return Err(AffinityError::EmptyMask);
        }
        let os_error = |err: nix::Error| AffinityError::Os {
            mask: mask.to_string(),
            message: err.to_string(),
        };
        let mut set = CpuSet::new();
        for cpu in mask.cpus() {
            set.set(cpu).map_err(os_error)?;
        }
        sched_setaffinity(Pid::from_raw(0), &set).map_err(os_error)
    }

    #[cfg(not(target_os = "linux"))]
    fn bind_current_thread(&self, mask: &CpuMask) -> Result<(), AffinityError> {
        if mask.is_empty() {
            return Err(AffinityError::EmptyMask);
        }
        Err(AffinityError::Unsupported)
    }
}

/// Binder that accepts every mask and touches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBinder;

impl AffinityBinder for NoopBinder {
    fn bind_current_thread(&self, _mask: &CpuMask) -> Result<(), AffinityError> {
        Ok(())
    }
}

thread_local! {
    static CURRENT_AFFINITY: Cell<Option<CoreAffinity>> = const { Cell::new(None) };
}

/// Core the calling thread has been bound to by the executive, if any.
#[must_use]
pub fn current_affinity() -> Option<CoreAffinity> {
    CURRENT_AFFINITY.with(Cell::get)
}

pub(crate) fn set_current_affinity(affinity: CoreAffinity) {
    CURRENT_AFFINITY.with(|current| current.set(Some(affinity)));
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{AffinityBinder, AffinityError, CpuMask};
    use parking_lot::Mutex;

    /// Records every bind request with the requesting thread's name.
    #[derive(Debug, Default)]
    pub struct RecordingBinder {
        pub binds: Mutex<Vec<(Option<String>, CpuMask)>>,
    }

    impl AffinityBinder for RecordingBinder {
        fn bind_current_thread(&self, mask: &CpuMask) -> Result<(), AffinityError> {
            let name = std::thread::current().name().map(str::to_owned);
            self.binds.lock().push((name, mask.clone()));
            Ok(())
        }
    }
}
