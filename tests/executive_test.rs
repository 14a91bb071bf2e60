//! Integration tests for core routing, thread pinning and bounded shutdown.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prometheus_kernel::builders::ExecutiveBuilder;
use prometheus_kernel::config::ExecutiveConfig;
use prometheus_kernel::core::{CoreAffinity, Job, KernelError, PoolError, ProcessIdentifier};
use prometheus_kernel::executive::{
    current_affinity, AffinityBinder, AffinityError, CpuMask, CpuTopology, Executive, TeamOversight,
};

/// Records the masks threads ask to be bound to, by thread name.
#[derive(Default)]
struct PinLog {
    pins: Mutex<Vec<(String, CpuMask)>>,
}

impl AffinityBinder for PinLog {
    fn bind_current_thread(&self, mask: &CpuMask) -> Result<(), AffinityError> {
        let name = thread::current().name().unwrap_or("unnamed").to_owned();
        self.pins.lock().push((name, mask.clone()));
        Ok(())
    }
}

fn config(shutdown_timeout_ms: u64) -> ExecutiveConfig {
    ExecutiveConfig {
        thread_stack_size: 256 * 1024,
        shutdown_timeout_ms,
        ..ExecutiveConfig::default()
    }
}

fn build(layout: Vec<Vec<usize>>, shutdown_timeout_ms: u64) -> (Executive, Arc<PinLog>) {
    let pins = Arc::new(PinLog::default());
    let executive = ExecutiveBuilder::new(config(shutdown_timeout_ms))
        .with_topology(CpuTopology::from_core_layout(layout).unwrap())
        .with_binder(pins.clone())
        .build()
        .unwrap();
    (executive, pins)
}

#[test]
fn test_jobs_run_on_their_core() {
    let (executive, _pins) = build(vec![vec![0], vec![1], vec![2]], 2_000);
    let team = executive.create_team("routing", TeamOversight::Affinity).unwrap();
    team.start_working().unwrap();

    let (tx, rx) = mpsc::channel();
    for core in [2, 0, 1, 1] {
        let tx = tx.clone();
        let identifier = ProcessIdentifier::new(CoreAffinity::new(core));
        team.assign_job(Job::new(identifier, move || {
            tx.send((core, current_affinity())).unwrap();
            Ok(())
        }))
        .unwrap();
    }
    drop(tx);

    let observed: Vec<_> = rx.iter().take(4).collect();
    assert_eq!(observed.len(), 4);
    for (core, affinity) in observed {
        assert_eq!(affinity, Some(CoreAffinity::new(core)));
    }

    let stranger = ProcessIdentifier::new(CoreAffinity::new(3));
    let err = team.assign_job(Job::new(stranger, || Ok(()))).unwrap_err();
    assert_eq!(err, PoolError::UnknownCore { core: 3, cores: 3 });

    assert!(executive.stop_managing().all_terminated());
}

#[test]
fn test_workers_pin_to_their_logical_cpu() {
    let (executive, pins) = build(vec![vec![0, 2], vec![1, 3]], 2_000);
    assert_eq!(executive.thread_factory_count(), 4);
    let team = executive.create_team("pinned", TeamOversight::Affinity).unwrap();
    team.start_working().unwrap();
    assert!(executive.stop_managing().all_terminated());

    let pins = pins.pins.lock();
    let masks_of = |prefix: &str| -> Vec<CpuMask> {
        let mut masks: Vec<CpuMask> = pins
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(_, mask)| mask.clone())
            .collect();
        masks.sort_by_key(|mask| mask.cpus().next());
        masks
    };
    assert_eq!(masks_of("kernel-core0-"), [CpuMask::single(0), CpuMask::single(2)]);
    assert_eq!(masks_of("kernel-core1-"), [CpuMask::single(1), CpuMask::single(3)]);
    assert_eq!(masks_of("kernel-sched1"), [CpuMask::single(1)]);
}

#[test]
fn test_stop_managing_reports_pools_that_outlive_the_bound() {
    let (executive, _pins) = build(vec![vec![0], vec![1]], 100);
    let team = executive.create_team("slow", TeamOversight::Affinity).unwrap();
    team.start_working().unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let busy = ProcessIdentifier::new(CoreAffinity::new(0));
    team.assign_job(Job::new(busy, move || {
        started_tx.send(()).unwrap();
        thread::sleep(Duration::from_secs(2));
        Ok(())
    }))
    .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let began = Instant::now();
    let report = executive.stop_managing();
    assert!(began.elapsed() < Duration::from_secs(2));

    assert_eq!(report.pools.len(), 4);
    assert!(!report.all_terminated());
    assert_eq!(report.timed_out().collect::<Vec<_>>(), ["kernel-core0"]);
    assert_eq!(report.pools[0].pool, "kernel-core0");
    assert_eq!(report.pools[3].pool, "kernel-sched1");
}

#[test]
fn test_unrepresentable_delay_is_rejected() {
    let (executive, _pins) = build(vec![vec![0]], 2_000);
    let identifier = ProcessIdentifier::new(CoreAffinity::new(0));

    let err = executive.schedule(&identifier, Duration::MAX, || {}).unwrap_err();
    assert!(matches!(err, KernelError::Pool(PoolError::InvalidConfig(_))));

    let (tx, rx) = mpsc::channel();
    executive
        .schedule(&identifier, Duration::from_millis(1), move || tx.send(()).unwrap())
        .unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(executive.stop_managing().all_terminated());
}

#[test]
fn test_scheduling_after_stop_is_rejected() {
    let (executive, _pins) = build(vec![vec![0]], 2_000);
    executive.stop_managing();

    let identifier = ProcessIdentifier::new(CoreAffinity::new(0));
    let err = executive.schedule(&identifier, Duration::ZERO, || {}).unwrap_err();
    assert_eq!(err, KernelError::Pool(PoolError::PoolShutdown));
    assert!(executive.background_scheduler().schedule(Duration::ZERO, || {}).is_err());
}
