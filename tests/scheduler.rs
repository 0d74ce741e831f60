//! Health sweep behaviour: fan-out, deadline, fault isolation and stop.

use failover_proxy::health::{FailoverController, HealthScheduler, SchedulerSettings};
use failover_proxy::registry::NodeRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod common;

fn setup(
    nodes: usize,
    workers: usize,
    round_timeout: Duration,
) -> (Arc<HealthScheduler>, Arc<FailoverController>, Arc<common::ScriptedProbe>) {
    let configs = (0..nodes)
        .map(|i| common::node(&format!("n{i}"), i as i64 + 1, "http://127.0.0.1:9"))
        .collect();
    let registry = Arc::new(NodeRegistry::from_config(&[common::account("acc", configs)]).unwrap());
    let probe = Arc::new(common::ScriptedProbe::default());
    let controller = Arc::new(FailoverController::new(registry, probe.clone(), common::warmup(false)));
    let settings = SchedulerSettings {
        interval: Duration::from_secs(3600),
        workers,
        round_timeout,
        stop_timeout: Duration::from_secs(5),
    };
    let scheduler = Arc::new(HealthScheduler::new(controller.clone(), settings));
    (scheduler, controller, probe)
}

#[tokio::test]
async fn test_sweep_completes_every_task() {
    let (scheduler, _, probe) = setup(10, 3, Duration::from_secs(10));
    probe.set_healthy("n4", false);
    probe.set_healthy("n7", false);

    let report = scheduler.run_round().await;
    assert_eq!(report.tasks, 10);
    assert_eq!(report.workers, 3);
    assert_eq!(report.success, 8);
    assert_eq!(report.fail, 2);
    assert_eq!(report.completed(), 10);
    assert!(!report.timed_out);
    assert_eq!(probe.calls(), 10);
}

#[tokio::test]
async fn test_workers_clamped_to_task_count() {
    let (scheduler, _, _) = setup(2, 16, Duration::from_secs(10));
    let report = scheduler.run_round().await;
    assert_eq!(report.workers, 2);
    assert_eq!(report.completed(), 2);
}

#[tokio::test]
async fn test_empty_registry_skips_round() {
    let registry = Arc::new(NodeRegistry::new());
    let probe = Arc::new(common::ScriptedProbe::default());
    let controller = Arc::new(FailoverController::new(registry, probe, common::warmup(false)));
    let scheduler = HealthScheduler::new(controller, SchedulerSettings::default());

    let report = scheduler.run_round().await;
    assert_eq!(report.tasks, 0);
    assert_eq!(report.completed(), 0);
}

#[tokio::test]
async fn test_round_deadline_abandons_backlog() {
    let (scheduler, _, probe) = setup(6, 2, Duration::from_millis(200));
    probe.set_delay(Duration::from_secs(2));

    let started = Instant::now();
    let report = scheduler.run_round().await;
    assert!(report.timed_out);
    assert!(report.completed() < 6);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_panicking_check_does_not_stop_worker() {
    let (scheduler, _, probe) = setup(3, 1, Duration::from_secs(10));
    probe.panic_on("n1");

    let report = scheduler.run_round().await;
    assert_eq!(report.tasks, 3);
    assert_eq!(report.success, 2);
    assert_eq!(report.fail, 1);
    assert!(!report.timed_out);
}

#[tokio::test]
async fn test_sweep_recovers_and_promotes_failed_node() {
    let (scheduler, controller, _) = setup(2, 2, Duration::from_secs(10));
    let registry = controller.registry().clone();
    for _ in 0..3 {
        controller.handle_failure("n0", "boom").await.unwrap();
    }
    assert_eq!(registry.active_id("acc").as_deref(), Some("n1"));

    scheduler.run_round().await;
    assert!(!registry.is_failed("n0"));
    assert_eq!(registry.active_id("acc").as_deref(), Some("n0"));
}

#[tokio::test]
async fn test_recovery_started_before_deadline_still_promotes() {
    let (scheduler, controller, probe) = setup(2, 2, Duration::from_millis(100));
    let registry = controller.registry().clone();
    for _ in 0..3 {
        controller.handle_failure("n0", "boom").await.unwrap();
    }
    assert_eq!(registry.active_id("acc").as_deref(), Some("n1"));

    probe.set_delay(Duration::from_millis(300));
    let report = scheduler.run_round().await;
    assert!(report.timed_out);
    assert_eq!(report.completed(), 0);

    let deadline = Instant::now() + Duration::from_secs(3);
    while registry.active_id("acc").as_deref() != Some("n0") && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!registry.is_failed("n0"));
    assert!(registry.account("acc").unwrap().failed_set.is_empty());
    assert_eq!(registry.active_id("acc").as_deref(), Some("n0"));
}

#[tokio::test]
async fn test_start_runs_immediately_and_stop_is_idempotent() {
    let (scheduler, _, probe) = setup(4, 2, Duration::from_secs(5));
    scheduler.start();

    let deadline = Instant::now() + Duration::from_secs(5);
    while probe.calls() < 4 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(probe.calls(), 4);

    let started = Instant::now();
    scheduler.stop().await;
    scheduler.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));

    // Stopped schedulers do not restart.
    scheduler.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(probe.calls(), 4);
}

#[tokio::test]
async fn test_stop_after_timed_out_round_returns() {
    let (scheduler, _, probe) = setup(4, 2, Duration::from_millis(150));
    probe.set_delay(Duration::from_secs(10));
    scheduler.start();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    scheduler.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));
}
