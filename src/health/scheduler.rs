//! Full-fleet health sweeps.
//!
//! # Responsibilities
//! - Probe every node of every account on a fixed interval
//! - Bound fan-out with a fixed worker count
//! - Bound each round with one shared deadline
//!
//! # Design Decisions
//! - Workers pull from a shared cursor; tasks are claimed exactly once
//! - After the deadline, workers stop claiming tasks and stop waiting for
//!   the in-flight check without counting it; a started check always runs
//!   to completion in its own task
//! - A panicking check is logged and counted as a failure; the worker carries on

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::{HealthSchedulerConfig, MAX_HEALTH_WORKERS};
use crate::health::controller::FailoverController;
use crate::health::types::CheckSource;
use crate::observability::metrics;

/// How long `stop` waits for the loop before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Zero disables the scheduler.
    pub interval: Duration,
    pub workers: usize,
    pub round_timeout: Duration,
    pub stop_timeout: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &HealthSchedulerConfig) -> Self {
        let defaults = HealthSchedulerConfig::default();
        let round_timeout_secs = if config.round_timeout_secs == 0 {
            defaults.round_timeout_secs
        } else {
            config.round_timeout_secs
        };
        let workers = if config.workers == 0 {
            defaults.workers
        } else {
            config.workers
        };
        Self {
            interval: Duration::from_secs(config.interval_secs),
            workers: workers.min(MAX_HEALTH_WORKERS),
            round_timeout: Duration::from_secs(round_timeout_secs),
            stop_timeout: STOP_TIMEOUT,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&HealthSchedulerConfig::default())
    }
}

/// Counters of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub tasks: usize,
    pub success: u64,
    pub fail: u64,
    pub workers: usize,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl SweepReport {
    pub fn completed(&self) -> u64 {
        self.success + self.fail
    }
}

#[derive(Debug, Clone)]
struct HealthTask {
    account_id: String,
    node_id: String,
}

#[derive(Debug, Default)]
struct RoundState {
    cursor: AtomicUsize,
    success: AtomicU64,
    fail: AtomicU64,
    timed_out: AtomicBool,
}

#[derive(Debug)]
pub struct HealthScheduler {
    controller: Arc<FailoverController>,
    settings: SchedulerSettings,
    stop_tx: watch::Sender<bool>,
    stopped: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthScheduler {
    pub fn new(controller: Arc<FailoverController>, settings: SchedulerSettings) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            controller,
            settings,
            stop_tx,
            stopped: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Run one sweep now, then one per interval until `stop`.
    pub fn start(self: &Arc<Self>) {
        if self.settings.interval.is_zero() {
            tracing::info!("Health scheduler disabled");
            return;
        }
        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() || self.stopped.load(Ordering::SeqCst) {
            return;
        }

        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            workers = self.settings.workers,
            round_timeout_secs = self.settings.round_timeout.as_secs(),
            "Health scheduler starting"
        );

        let scheduler = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        *slot = Some(tokio::spawn(async move {
            let interval = scheduler.settings.interval;
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                if *stop_rx.borrow() {
                    break;
                }
                scheduler.run_round().await;
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::info!("Health scheduler loop exited");
        }));
    }

    /// Stop the loop. Only the first call has an effect; it waits up to
    /// `stop_timeout` for the loop to finish and then aborts it.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_tx.send_replace(true);

        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut handle) = handle else {
            return;
        };
        match time::timeout(self.settings.stop_timeout, &mut handle).await {
            Ok(_) => tracing::info!("Health scheduler stopped"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.settings.stop_timeout.as_secs(),
                    "Health scheduler did not stop in time; aborting"
                );
                handle.abort();
            }
        }
    }

    /// Probe every node once.
    pub async fn run_round(&self) -> SweepReport {
        let started = Instant::now();
        let tasks = self.snapshot_tasks();

        if tasks.is_empty() {
            tracing::info!("Health sweep skipped: no nodes");
            return SweepReport {
                tasks: 0,
                success: 0,
                fail: 0,
                workers: 0,
                elapsed: started.elapsed(),
                timed_out: false,
            };
        }

        let workers = self.settings.workers.min(tasks.len()).max(1);
        let deadline = started + self.settings.round_timeout;
        let tasks = Arc::new(tasks);
        let state = Arc::new(RoundState::default());

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let controller = Arc::clone(&self.controller);
                let tasks = Arc::clone(&tasks);
                let state = Arc::clone(&state);
                tokio::spawn(run_worker(worker, controller, tasks, state, deadline))
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Health worker terminated abnormally");
            }
        }

        let report = SweepReport {
            tasks: tasks.len(),
            success: state.success.load(Ordering::SeqCst),
            fail: state.fail.load(Ordering::SeqCst),
            workers,
            elapsed: started.elapsed(),
            timed_out: state.timed_out.load(Ordering::SeqCst),
        };

        if report.timed_out {
            tracing::warn!(
                tasks = report.tasks,
                success = report.success,
                fail = report.fail,
                workers = report.workers,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Health sweep timed out"
            );
        } else {
            tracing::info!(
                tasks = report.tasks,
                success = report.success,
                fail = report.fail,
                workers = report.workers,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Health sweep complete"
            );
        }
        metrics::record_sweep(report.success, report.fail, report.elapsed, report.timed_out);
        report
    }

    fn snapshot_tasks(&self) -> Vec<HealthTask> {
        let registry = self.controller.registry();
        let mut tasks = Vec::new();
        for account_id in registry.account_ids() {
            for node_id in registry.node_ids(&account_id) {
                tasks.push(HealthTask {
                    account_id: account_id.clone(),
                    node_id,
                });
            }
        }
        tasks
    }
}

async fn run_worker(
    worker: usize,
    controller: Arc<FailoverController>,
    tasks: Arc<Vec<HealthTask>>,
    state: Arc<RoundState>,
    deadline: Instant,
) {
    loop {
        if Instant::now() >= deadline {
            state.timed_out.store(true, Ordering::SeqCst);
            return;
        }
        let index = state.cursor.fetch_add(1, Ordering::SeqCst);
        let Some(task) = tasks.get(index) else {
            return;
        };

        let account_id = task.account_id.clone();
        let node_id = task.node_id.clone();
        let checker = Arc::clone(&controller);
        let mut check = tokio::spawn(async move {
            let result = AssertUnwindSafe(checker.check_node_health(&account_id, &node_id, CheckSource::Scheduled))
                .catch_unwind()
                .await;
            if result.is_err() {
                tracing::error!(worker, node_id = %node_id, "Health check panicked");
            }
            result
        });

        tokio::select! {
            result = &mut check => match result {
                Ok(Ok(Ok(true))) => {
                    state.success.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Ok(Ok(false))) => {
                    state.fail.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Ok(Err(e))) => {
                    tracing::debug!(worker, node_id = %task.node_id, error = %e, "Health task skipped");
                    state.fail.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Err(_)) => {
                    state.fail.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    tracing::error!(worker, node_id = %task.node_id, error = %e, "Health check task failed");
                    state.fail.fetch_add(1, Ordering::SeqCst);
                }
            },
            // The detached check keeps running and applies its result.
            _ = time::sleep_until(deadline) => {
                state.timed_out.store(true, Ordering::SeqCst);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_clamp_workers() {
        let settings = SchedulerSettings::from_config(&HealthSchedulerConfig {
            interval_secs: 10,
            workers: 10_000,
            round_timeout_secs: 0,
        });
        assert_eq!(settings.workers, MAX_HEALTH_WORKERS);
        assert_eq!(settings.round_timeout, Duration::from_secs(60));

        let settings = SchedulerSettings::from_config(&HealthSchedulerConfig {
            workers: 0,
            ..HealthSchedulerConfig::default()
        });
        assert_eq!(settings.workers, HealthSchedulerConfig::default().workers);
        assert_eq!(settings.interval, Duration::from_secs(300));
        assert_eq!(settings.stop_timeout, STOP_TIMEOUT);
    }
}
