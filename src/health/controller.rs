//! Failure and recovery controller.
//!
//! # Responsibilities
//! - Demote a node after `fail_limit` consecutive live-traffic failures
//! - Re-probe failed nodes on the account re-check interval
//! - Promote the best candidate, gated by warmup
//!
//! # State Transitions
//! ```text
//! healthy → failed:  fail_streak reaches fail_limit (live traffic)
//! failed → healthy:  any successful probe
//! ```
//!
//! # Design Decisions
//! - Registry mutations run in one short closure; probes, persistence and
//!   notification happen after the lock is released
//! - Selection runs once per demotion crossing, not on every failure past it
//! - Warmup probes never trigger selection themselves

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::WarmupConfig;
use crate::health::probe::{HealthProbe, ProbeTarget};
use crate::health::types::{Activation, CheckSource, FailoverError, ProbeOutcome};
use crate::health::warmup::{is_node_warmed_up, WarmupProber};
use crate::notify::{Event, Notifier};
use crate::observability::metrics;
use crate::registry::{HealthCheckMethod, NodeRegistry, NodeSelector, WeightedPriority};
use crate::resilience::BreakerRegistry;
use crate::store::{HealthCheckRecord, NodeRecord, StoreWriter};

/// Mutation summary produced under the write lock by `handle_failure`.
struct FailureApplied {
    account_id: String,
    node_name: String,
    streak: u64,
    limit: u64,
    demoted: bool,
    record: Option<NodeRecord>,
}

/// Mutation summary produced under the write lock by a probe.
struct ProbeApplied {
    node_name: String,
    healthy: bool,
    recovered: bool,
    account_inactive: bool,
    record: NodeRecord,
}

struct Candidate {
    id: String,
    name: String,
    weight: i64,
}

/// Drives node demotion, recovery and promotion.
#[derive(Debug)]
pub struct FailoverController {
    registry: Arc<NodeRegistry>,
    probe: Arc<dyn HealthProbe>,
    store: Option<StoreWriter>,
    notifier: Option<Arc<dyn Notifier>>,
    breakers: Option<Arc<BreakerRegistry>>,
    warmup: WarmupProber,
    selector: WeightedPriority,
}

impl FailoverController {
    pub fn new(registry: Arc<NodeRegistry>, probe: Arc<dyn HealthProbe>, warmup: WarmupConfig) -> Self {
        Self {
            registry,
            probe,
            store: None,
            notifier: None,
            breakers: None,
            warmup: WarmupProber::new(warmup),
            selector: WeightedPriority,
        }
    }

    pub fn with_store(mut self, store: StoreWriter) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn warmup(&self) -> &WarmupProber {
        &self.warmup
    }

    /// Breaker admission for a request about to hit `node_id`.
    pub fn admit(&self, node_id: &str) -> bool {
        self.breakers
            .as_ref()
            .map(|b| b.allow_request(node_id))
            .unwrap_or(true)
    }

    /// Feed one live request outcome into the breaker and the failure state
    /// machine. Returns whether the node was demoted by this call.
    pub async fn report_request(
        self: &Arc<Self>,
        node_id: &str,
        result: Result<(), String>,
    ) -> Result<bool, FailoverError> {
        if let Some(breakers) = &self.breakers {
            breakers.record_result(node_id, result.is_ok());
        }
        match result {
            Ok(()) => self.record_success(node_id).map(|_| false),
            Err(e) => self.handle_failure(node_id, &e).await,
        }
    }

    /// A live request succeeded.
    pub fn record_success(&self, node_id: &str) -> Result<(), FailoverError> {
        self.registry.write(|state| {
            let account = state
                .account_of_node_mut(node_id)
                .ok_or_else(|| FailoverError::NodeNotFound(node_id.to_string()))?;
            let node = account
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| FailoverError::NodeNotFound(node_id.to_string()))?;
            node.metrics.requests += 1;
            node.metrics.fail_streak = 0;
            Ok(())
        })
    }

    /// A live request failed. Demotes the node when its streak crosses the
    /// account fail limit, then looks for a replacement.
    pub async fn handle_failure(self: &Arc<Self>, node_id: &str, error: &str) -> Result<bool, FailoverError> {
        let message = if error.trim().is_empty() {
            "unknown error"
        } else {
            error
        };

        let applied = self
            .registry
            .write(|state| {
                let account = state.account_of_node_mut(node_id)?;
                let limit = account.settings.effective_fail_limit();
                let node = account.nodes.get_mut(node_id)?;

                node.metrics.requests += 1;
                node.metrics.fail_count += 1;
                node.metrics.fail_streak += 1;
                node.last_error = Some(message.to_string());

                let demoted = !node.failed && node.metrics.fail_streak >= limit;
                let streak = node.metrics.fail_streak;
                let node_name = node.name.clone();
                if demoted {
                    account.mark_failed(node_id);
                }
                let record = demoted
                    .then(|| account.nodes.get(node_id).map(|n| NodeRecord::from_node(&account.id, n)))
                    .flatten();

                Some(FailureApplied {
                    account_id: account.id.clone(),
                    node_name,
                    streak,
                    limit,
                    demoted,
                    record,
                })
            })
            .ok_or_else(|| FailoverError::NodeNotFound(node_id.to_string()))?;

        if !applied.demoted {
            tracing::debug!(
                node = %applied.node_name,
                streak = applied.streak,
                limit = applied.limit,
                error = %message,
                "Request failure recorded"
            );
            return Ok(false);
        }

        tracing::warn!(
            account = %applied.account_id,
            node = %applied.node_name,
            node_id = %node_id,
            streak = applied.streak,
            error = %message,
            "Node demoted after consecutive failures"
        );
        metrics::record_demotion(&applied.account_id);
        metrics::record_node_state(&applied.account_id, node_id, true);

        if let Some(record) = applied.record {
            self.persist(record);
        }
        self.publish(Event::node_failed(&applied.account_id, node_id, &applied.node_name, message));

        match self.select_best_and_activate(&applied.account_id, "node failed").await {
            Ok(activation) => tracing::info!(
                account = %applied.account_id,
                node = %activation.node_name,
                "Failover target selected"
            ),
            Err(e) => tracing::warn!(account = %applied.account_id, error = %e, "Failover did not complete"),
        }
        Ok(true)
    }

    /// Probe one node and apply the result. A probe that clears a failed
    /// node publishes a recovery and reconsiders promotion. A healthy probe
    /// on an account without an active node also runs selection. Neither
    /// happens for warmup probes. Returns whether the probe was healthy.
    pub async fn check_node_health(
        self: &Arc<Self>,
        account_id: &str,
        node_id: &str,
        source: CheckSource,
    ) -> Result<bool, FailoverError> {
        let applied = self.probe_and_apply(account_id, node_id, source).await?;
        if source == CheckSource::Warmup {
            return Ok(applied.healthy);
        }

        if applied.recovered {
            tracing::info!(
                account = %account_id,
                node = %applied.node_name,
                source = %source,
                "Node recovered"
            );
            metrics::record_recovery(account_id);
            metrics::record_node_state(account_id, node_id, false);
            self.publish(Event::node_recovered(account_id, node_id, &applied.node_name));

            if let Err(e) = self.select_best_and_activate(account_id, "node recovered").await {
                tracing::warn!(account = %account_id, error = %e, "Promotion after recovery did not complete");
            }
        } else if applied.healthy && applied.account_inactive {
            match self.select_best_and_activate(account_id, "no active node").await {
                Ok(activation) => tracing::info!(
                    account = %account_id,
                    node = %activation.node_name,
                    "Active node restored"
                ),
                Err(e) => tracing::debug!(account = %account_id, error = %e, "Account still has no active node"),
            }
        }
        Ok(applied.healthy)
    }

    async fn probe_and_apply(
        &self,
        account_id: &str,
        node_id: &str,
        source: CheckSource,
    ) -> Result<ProbeApplied, FailoverError> {
        let target = self.registry.read(|state| {
            let account = state
                .account(account_id)
                .ok_or_else(|| FailoverError::AccountNotFound(account_id.to_string()))?;
            let node = account
                .nodes
                .get(node_id)
                .ok_or_else(|| FailoverError::NodeNotFound(node_id.to_string()))?;
            Ok::<_, FailoverError>(ProbeTarget::from_node(node))
        })?;

        let checked_at = SystemTime::now();
        let outcome = self.probe.probe(&target).await;
        metrics::record_probe(source.as_str(), target.method.as_str(), outcome.healthy, outcome.latency);

        let applied = self.apply_probe(account_id, node_id, checked_at, &outcome);
        // The node may have been removed while the probe was in flight.
        let Some(applied) = applied else {
            return Err(FailoverError::NodeNotFound(node_id.to_string()));
        };

        if !outcome.healthy {
            tracing::debug!(
                node = %applied.node_name,
                source = %source,
                error = outcome.error.as_deref().unwrap_or_default(),
                latency_ms = outcome.latency.as_millis() as u64,
                "Probe failed"
            );
        }

        self.persist(applied.record.clone());
        self.record_history(account_id, node_id, checked_at, &outcome, target.method, source);

        Ok(applied)
    }

    fn apply_probe(
        &self,
        account_id: &str,
        node_id: &str,
        checked_at: SystemTime,
        outcome: &ProbeOutcome,
    ) -> Option<ProbeApplied> {
        self.registry.write(|state| {
            let account = state.account_mut(account_id)?;
            let node = account.nodes.get_mut(node_id)?;

            node.record_probe(checked_at, outcome.latency);
            let was_failed = node.failed;
            if outcome.healthy {
                node.mark_recovered();
            } else {
                node.metrics.last_ping_err = outcome.error.clone();
            }
            let record = NodeRecord::from_node(&account.id, node);
            let node_name = node.name.clone();
            if outcome.healthy {
                account.failed_set.remove(node_id);
            }

            Some(ProbeApplied {
                node_name,
                healthy: outcome.healthy,
                recovered: outcome.healthy && was_failed,
                account_inactive: account.active_id.is_none(),
                record,
            })
        })
    }

    /// Re-probe every node in any failed set. Returns how many recovered.
    pub async fn check_failed_nodes(self: &Arc<Self>) -> usize {
        let failed = self.registry.failed_nodes();
        if failed.is_empty() {
            return 0;
        }

        let started = Instant::now();
        let mut recovered = 0;
        for (account_id, node_id) in &failed {
            match self.check_node_health(account_id, node_id, CheckSource::Recheck).await {
                Ok(true) => recovered += 1,
                Ok(false) => {}
                Err(e) => tracing::debug!(node_id = %node_id, error = %e, "Skipping re-check"),
            }
        }

        tracing::info!(
            checked = failed.len(),
            recovered,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Failed-node re-check complete"
        );
        recovered
    }

    /// Background re-check loop; exits on shutdown or when no account has a
    /// positive re-check interval.
    pub async fn run_recheck_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let Some(interval) = self.registry.min_health_interval() else {
            tracing::info!("Failed-node re-check disabled");
            return;
        };

        tracing::info!(interval_secs = interval.as_secs(), "Failed-node re-check starting");
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_failed_nodes().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Re-check loop received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Pick the best candidate of an account and make it active.
    ///
    /// The winner must pass warmup when warmup is enabled and it is not
    /// already active. A failed warmup leaves the active node unchanged and
    /// does not fall through to the next candidate.
    pub async fn select_best_and_activate(
        self: &Arc<Self>,
        account_id: &str,
        reason: &str,
    ) -> Result<Activation, FailoverError> {
        let (candidate, previous) = self.registry.read(|state| {
            let account = state
                .account(account_id)
                .ok_or_else(|| FailoverError::AccountNotFound(account_id.to_string()))?;
            let best = self
                .selector
                .select(account)
                .ok_or_else(|| FailoverError::NoHealthyNode(account_id.to_string()))?;
            Ok::<_, FailoverError>((
                Candidate {
                    id: best.id.clone(),
                    name: best.name.clone(),
                    weight: best.weight,
                },
                account.active_id.clone(),
            ))
        })?;

        let activation = Activation {
            node_id: candidate.id.clone(),
            node_name: candidate.name.clone(),
            weight: candidate.weight,
            previous,
        };
        if !activation.changed() {
            return Ok(activation);
        }

        let config = self.warmup.config();
        if config.enabled {
            let successes = self.warmup_node(account_id, &candidate.id).await?;
            let passed = is_node_warmed_up(successes, config);
            metrics::record_warmup(passed);
            if !passed {
                tracing::warn!(
                    account = %account_id,
                    node = %candidate.name,
                    successes,
                    required = config.required_success,
                    "Candidate failed warmup; keeping current active node"
                );
                return Err(FailoverError::WarmupFailed {
                    node: candidate.id,
                    successes,
                    required: config.required_success,
                });
            }
        }

        self.registry.write(|state| {
            let account = state
                .account_mut(account_id)
                .ok_or_else(|| FailoverError::AccountNotFound(account_id.to_string()))?;
            match account.nodes.get(&candidate.id) {
                Some(node) if node.is_candidate() => {
                    account.active_id = Some(candidate.id.clone());
                    Ok(())
                }
                _ => Err(FailoverError::CandidateUnavailable(candidate.id.clone())),
            }
        })?;

        tracing::info!(
            account = %account_id,
            node = %candidate.name,
            weight = candidate.weight,
            previous = activation.previous.as_deref().unwrap_or("none"),
            reason,
            "Active node changed"
        );
        metrics::record_activation(account_id);
        Ok(activation)
    }

    /// Run the warmup sequence against one node and return the raw success
    /// count. An attempt passes when it completes in time and the node is
    /// still not failed afterwards, whatever the probe reported.
    pub async fn warmup_node(self: &Arc<Self>, account_id: &str, node_id: &str) -> Result<u32, FailoverError> {
        let node_name = self.registry.read(|state| {
            let account = state
                .account(account_id)
                .ok_or_else(|| FailoverError::AccountNotFound(account_id.to_string()))?;
            account
                .nodes
                .get(node_id)
                .map(|n| n.name.clone())
                .ok_or_else(|| FailoverError::NodeNotFound(node_id.to_string()))
        })?;

        let started = Instant::now();
        let controller = Arc::clone(self);
        let account = account_id.to_string();
        let node = node_id.to_string();
        let successes = self
            .warmup
            .run(&node_name, move || {
                let controller = Arc::clone(&controller);
                let account = account.clone();
                let node = node.clone();
                async move {
                    match controller.probe_and_apply(&account, &node, CheckSource::Warmup).await {
                        Ok(_) => !controller.registry.is_failed(&node),
                        Err(_) => false,
                    }
                }
            })
            .await;

        tracing::info!(
            account = %account_id,
            node = %node_name,
            successes,
            attempts = self.warmup.config().attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Warmup complete"
        );
        Ok(successes)
    }

    /// Flush queued store writes.
    pub async fn flush_store(&self) {
        if let Some(store) = &self.store {
            store.flush().await;
        }
    }

    fn persist(&self, record: NodeRecord) {
        if let Some(store) = &self.store {
            store.upsert_node(record);
        }
    }

    fn record_history(
        &self,
        account_id: &str,
        node_id: &str,
        checked_at: SystemTime,
        outcome: &ProbeOutcome,
        method: HealthCheckMethod,
        source: CheckSource,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        let record = HealthCheckRecord {
            account_id: account_id.to_string(),
            node_id: node_id.to_string(),
            check_time: checked_at,
            success: outcome.healthy,
            response_time_ms: duration_ms(outcome.latency),
            error_message: outcome.error.clone(),
            check_method: method,
            check_source: source,
        };
        store.insert_health_check(record);
    }

    fn publish(&self, event: Event) {
        if let Some(notifier) = &self.notifier {
            notifier.publish(event);
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
