//! Metrics collection and exposition.
//!
//! # Metrics
//! - `failover_probes_total` (counter): probes by source, method, result
//! - `failover_probe_duration_seconds` (histogram): probe latency by source
//! - `failover_node_failed` (gauge): 1=demoted, 0=healthy, per node
//! - `failover_demotions_total` / `failover_recoveries_total` (counters)
//! - `failover_activations_total` (counter): active-node changes per account
//! - `failover_warmups_total` (counter): warmups by result
//! - `failover_sweeps_total`, `failover_sweep_duration_seconds`
//! - `failover_breaker_transitions_total` (counter): by from/to state
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels never carry error text (unbounded cardinality)

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_probe(source: &'static str, method: &'static str, healthy: bool, latency: Duration) {
    let result = if healthy { "ok" } else { "fail" };
    ::metrics::counter!(
        "failover_probes_total",
        "source" => source,
        "method" => method,
        "result" => result
    )
    .increment(1);
    ::metrics::histogram!("failover_probe_duration_seconds", "source" => source)
        .record(latency.as_secs_f64());
}

pub fn record_node_state(account: &str, node: &str, failed: bool) {
    ::metrics::gauge!(
        "failover_node_failed",
        "account" => account.to_string(),
        "node" => node.to_string()
    )
    .set(if failed { 1.0 } else { 0.0 });
}

pub fn record_demotion(account: &str) {
    ::metrics::counter!("failover_demotions_total", "account" => account.to_string()).increment(1);
}

pub fn record_recovery(account: &str) {
    ::metrics::counter!("failover_recoveries_total", "account" => account.to_string()).increment(1);
}

pub fn record_activation(account: &str) {
    ::metrics::counter!("failover_activations_total", "account" => account.to_string()).increment(1);
}

pub fn record_warmup(passed: bool) {
    let result = if passed { "passed" } else { "failed" };
    ::metrics::counter!("failover_warmups_total", "result" => result).increment(1);
}

pub fn record_sweep(success: u64, fail: u64, elapsed: Duration, timed_out: bool) {
    let outcome = if timed_out { "timeout" } else { "complete" };
    ::metrics::counter!("failover_sweeps_total", "outcome" => outcome).increment(1);
    ::metrics::counter!("failover_sweep_tasks_total", "result" => "ok").increment(success);
    ::metrics::counter!("failover_sweep_tasks_total", "result" => "fail").increment(fail);
    ::metrics::histogram!("failover_sweep_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_breaker_transition(resource: &str, from: &'static str, to: &'static str) {
    ::metrics::counter!(
        "failover_breaker_transitions_total",
        "resource" => resource.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}
