//! CPU topology: physical cores and the logical CPUs (hardware threads) they carry.
//!
//! Discovered once at startup and read-only afterwards.

use std::collections::BTreeSet;
use std::fmt;

use crate::core::error::KernelError;
use crate::executive::affinity::CpuMask;

/// A hardware thread, identified by the OS CPU number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalCpu(usize);

impl LogicalCpu {
    /// Logical CPU with OS id `id`.
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// OS CPU number.
    #[must_use]
    pub const fn id(self) -> usize {
        self.0
    }
}

impl fmt::Display for LogicalCpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// A physical core and its logical CPUs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuCore {
    index: usize,
    logical_cpus: Vec<LogicalCpu>,
}

impl CpuCore {
    /// Position of the core in the topology; equals the [`CoreAffinity`] index.
    ///
    /// [`CoreAffinity`]: crate::core::job::CoreAffinity
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Logical CPUs of this core.
    #[must_use]
    pub fn logical_cpus(&self) -> &[LogicalCpu] {
        &self.logical_cpus
    }

    /// Mask over every logical CPU of this core.
    #[must_use]
    pub fn mask(&self) -> CpuMask {
        CpuMask::new(self.logical_cpus.iter().map(|cpu| cpu.id()))
    }
}

/// The machine's cores, ordered by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTopology {
    cores: Vec<CpuCore>,
}

impl CpuTopology {
    /// Build a topology from explicit groups of logical CPU ids, one group per core.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Configuration`] if there is no core, a core has no
    /// logical CPU, or a logical CPU appears twice.
    pub fn from_core_layout(layout: Vec<Vec<usize>>) -> Result<Self, KernelError> {
        if layout.is_empty() {
            return Err(KernelError::Configuration("topology has no cores".into()));
        }
        let mut seen = BTreeSet::new();
        let mut cores = Vec::with_capacity(layout.len());
        for (index, cpus) in layout.into_iter().enumerate() {
            if cpus.is_empty() {
                return Err(KernelError::Configuration(format!(
                    "core {index} has no logical cpus"
                )));
            }
            for &cpu in &cpus {
                if !seen.insert(cpu) {
                    return Err(KernelError::Configuration(format!(
                        "logical cpu {cpu} assigned to more than one core"
                    )));
                }
            }
            cores.push(CpuCore {
                index,
                logical_cpus: cpus.into_iter().map(LogicalCpu::new).collect(),
            });
        }
        Ok(Self { cores })
    }

    /// One core per logical CPU reported by `num_cpus`.
    #[must_use]
    pub fn flat() -> Self {
        let cores = (0..num_cpus::get().max(1))
            .map(|cpu| CpuCore {
                index: cpu,
                logical_cpus: vec![LogicalCpu::new(cpu)],
            })
            .collect();
        Self { cores }
    }

    /// Discover the topology of the CPUs this process may run on.
    ///
    /// On Linux the allowed CPUs come from the process affinity mask and are grouped
    /// into cores through sysfs. Elsewhere, or when discovery fails, every logical CPU
    /// is treated as its own core.
    #[must_use]
    pub fn discover() -> Self {
        #[cfg(target_os = "linux")]
        {
            match linux::discover() {
                Ok(topology) => {
                    tracing::debug!(
                        cores = topology.core_count(),
                        logical_cpus = topology.logical_cpu_count(),
                        "cpu topology discovered"
                    );
                    return topology;
                }
                Err(err) => tracing::warn!(error = %err, "cpu topology discovery failed, using flat layout"),
            }
        }
        Self::flat()
    }

    /// Cores in index order.
    #[must_use]
    pub fn cores(&self) -> &[CpuCore] {
        &self.cores
    }

    /// Core at `index`.
    #[must_use]
    pub fn core(&self, index: usize) -> Option<&CpuCore> {
        self.cores.get(index)
    }

    /// Number of cores.
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    /// Number of logical CPUs across all cores.
    #[must_use]
    pub fn logical_cpu_count(&self) -> usize {
        self.cores.iter().map(|core| core.logical_cpus.len()).sum()
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::BTreeMap;
    use std::fs;

    use nix::sched::{sched_getaffinity, CpuSet};
    use nix::unistd::Pid;

    use super::CpuTopology;
    use crate::core::error::KernelError;

    const SYSFS_CPU: &str = "/sys/devices/system/cpu";

    pub(super) fn discover() -> Result<CpuTopology, KernelError> {
        let allowed = sched_getaffinity(Pid::from_raw(0))
            .map_err(|err| KernelError::Configuration(format!("sched_getaffinity: {err}")))?;

        // (package, core) -> logical cpus, ordered so core indices are stable
        let mut groups: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        for cpu in (0..CpuSet::count()).filter(|&cpu| allowed.is_set(cpu).unwrap_or(false)) {
            let package = read_topology(cpu, "physical_package_id")?;
            let core = read_topology(cpu, "core_id")?;
            groups.entry((package, core)).or_default().push(cpu);
        }
        CpuTopology::from_core_layout(groups.into_values().collect())
    }

    fn read_topology(cpu: usize, field: &str) -> Result<usize, KernelError> {
        let path = format!("{SYSFS_CPU}/cpu{cpu}/topology/{field}");
        let raw = fs::read_to_string(&path)
            .map_err(|err| KernelError::Configuration(format!("{path}: {err}")))?;
        raw.trim()
            .parse()
            .map_err(|err| KernelError::Configuration(format!("{path}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_groups_hyperthreads() {
        let topology = CpuTopology::from_core_layout(vec![vec![0, 4], vec![1, 5]]).unwrap();
        assert_eq!(topology.core_count(), 2);
        assert_eq!(topology.logical_cpu_count(), 4);
        assert_eq!(topology.core(1).unwrap().mask(), CpuMask::new([1, 5]));
        assert!(topology.core(2).is_none());
    }

    #[test]
    fn test_layout_rejects_shared_cpu() {
        let err = CpuTopology::from_core_layout(vec![vec![0], vec![0]]).unwrap_err();
        assert!(err.is_configuration());
        assert!(CpuTopology::from_core_layout(Vec::new()).is_err());
        assert!(CpuTopology::from_core_layout(vec![vec![]]).is_err());
    }

    #[test]
    fn test_discover_finds_at_least_one_core() {
        let topology = CpuTopology::discover();
        assert!(topology.core_count() >= 1);
        assert!(topology.logical_cpu_count() >= topology.core_count());
    }
}
