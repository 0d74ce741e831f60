//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the failover
//! control plane. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::registry::HealthCheckMethod;

/// Hard cap on globally concurrent warmups.
pub const MAX_WARMUP_CONCURRENCY: usize = 2;

/// Hard cap on health sweep workers.
pub const MAX_HEALTH_WORKERS: usize = 256;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FailoverConfig {
    /// Per-node circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Pre-promotion warmup settings.
    pub warmup: WarmupConfig,

    /// Full-fleet health sweep settings.
    pub scheduler: HealthSchedulerConfig,

    /// Probe request settings.
    pub probe: ProbeConfig,

    /// Snapshot persistence.
    pub persistence: PersistenceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Read-only admin surface.
    pub admin: AdminConfig,

    /// Accounts and their nodes.
    pub accounts: Vec<AccountConfig>,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Disabled breakers admit everything and record nothing.
    pub enabled: bool,

    /// Sliding window length in seconds.
    pub window_seconds: u64,

    /// Failure ratio in (0, 1] that opens the circuit.
    pub failure_rate: f64,

    /// Consecutive failures that open the circuit.
    pub consecutive_fails: u32,

    /// Seconds in Open before trial requests are admitted.
    pub cooldown_seconds: u64,

    /// Trial requests admitted in Half-Open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 60,
            failure_rate: 0.5,
            consecutive_fails: 5,
            cooldown_seconds: 30,
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Replace every out-of-range value with its default.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.window_seconds == 0 {
            self.window_seconds = defaults.window_seconds;
        }
        if !(self.failure_rate > 0.0 && self.failure_rate <= 1.0) {
            self.failure_rate = defaults.failure_rate;
        }
        if self.consecutive_fails == 0 {
            self.consecutive_fails = defaults.consecutive_fails;
        }
        if self.cooldown_seconds == 0 {
            self.cooldown_seconds = defaults.cooldown_seconds;
        }
        if self.half_open_max_calls == 0 {
            self.half_open_max_calls = defaults.half_open_max_calls;
        }
        self
    }
}

/// Warmup configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// Probe candidates before promoting them.
    pub enabled: bool,

    /// Probe attempts per warmup.
    pub attempts: u32,

    /// Per-attempt timeout in milliseconds. Exceeds the 15s probe budget
    /// of slow upstreams plus margin.
    pub timeout_ms: u64,

    /// Successful attempts needed to pass.
    pub required_success: u32,

    /// Warmups allowed to run at once across the process.
    pub concurrency: usize,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 2,
            timeout_ms: 17_000,
            required_success: 1,
            concurrency: MAX_WARMUP_CONCURRENCY,
        }
    }
}

impl WarmupConfig {
    /// Apply floors and caps.
    pub fn normalized(mut self) -> Self {
        if self.attempts == 0 {
            self.attempts = 1;
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = Self::default().timeout_ms;
        }
        self.required_success = self.required_success.clamp(1, self.attempts);
        if self.concurrency > MAX_WARMUP_CONCURRENCY {
            tracing::info!(
                requested = self.concurrency,
                max = MAX_WARMUP_CONCURRENCY,
                "Reducing warmup concurrency to protect the host"
            );
        }
        self.concurrency = self.concurrency.clamp(1, MAX_WARMUP_CONCURRENCY);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Full-fleet health sweep configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthSchedulerConfig {
    /// Sweep interval in seconds; 0 disables the scheduler.
    pub interval_secs: u64,

    /// Worker tasks per sweep, capped at [`MAX_HEALTH_WORKERS`].
    pub workers: usize,

    /// Deadline for one sweep in seconds.
    pub round_timeout_secs: u64,
}

impl Default for HealthSchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            workers: 16,
            round_timeout_secs: 60,
        }
    }
}

/// Probe request configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Client timeout per probe in seconds.
    pub timeout_secs: u64,

    /// Model named in the synthetic API probe.
    pub model: String,

    /// `anthropic-version` header of the API probe.
    pub api_version: String,

    /// Bytes of error body kept on a failed probe.
    pub error_body_limit: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            model: "claude-3-5-haiku-20241022".to_string(),
            api_version: "2023-06-01".to_string(),
            error_body_limit: 500,
        }
    }
}

/// Snapshot persistence configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// JSON file receiving node snapshots; in-memory only when unset.
    pub path: Option<String>,

    /// Health-check history entries kept in memory.
    pub history_limit: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: None,
            history_limit: 1000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin dashboard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin dashboard.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin dashboard bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Account definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccountConfig {
    pub id: String,

    pub name: String,

    pub retry_count: u32,

    /// Consecutive failures before a node is demoted.
    pub fail_limit: u32,

    /// Re-check period for failed nodes in seconds; 0 disables it.
    pub health_check_interval_secs: u64,

    pub nodes: Vec<NodeConfig>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "default".to_string(),
            retry_count: 3,
            fail_limit: 3,
            health_check_interval_secs: 30,
            nodes: Vec::new(),
        }
    }
}

/// Node definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Unique across all accounts.
    pub id: String,

    pub name: String,

    /// Base URL of the upstream.
    pub url: String,

    /// Selects the API-style probe when present.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Selection priority, lower first (default: 1).
    #[serde(default = "default_weight")]
    pub weight: i64,

    #[serde(default)]
    pub disabled: bool,

    /// Overrides the method derived from `api_key`.
    #[serde(default)]
    pub health_check_method: Option<HealthCheckMethod>,

    /// Creation time in Unix seconds, used as the equal-weight tie-break.
    #[serde(default)]
    pub created_at: Option<u64>,
}

fn default_weight() -> i64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warmup_normalization() {
        let cfg = WarmupConfig {
            enabled: true,
            attempts: 0,
            timeout_ms: 0,
            required_success: 5,
            concurrency: 8,
        }
        .normalized();
        assert_eq!(cfg.attempts, 1);
        assert_eq!(cfg.required_success, 1);
        assert_eq!(cfg.timeout(), Duration::from_secs(17));
        assert_eq!(cfg.concurrency, MAX_WARMUP_CONCURRENCY);

        let cfg = WarmupConfig {
            attempts: 3,
            required_success: 0,
            concurrency: 0,
            ..WarmupConfig::default()
        }
        .normalized();
        assert_eq!(cfg.required_success, 1);
        assert_eq!(cfg.concurrency, 1);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let raw = r#"
            [scheduler]
            workers = 4

            [[accounts]]
            id = "team-a"
            name = "Team A"
            fail_limit = 2

            [[accounts.nodes]]
            id = "primary"
            name = "Primary"
            url = "https://api.example.com"
            api_key = "sk-1"

            [[accounts.nodes]]
            id = "backup"
            name = "Backup"
            url = "https://backup.example.com"
            weight = 2
            health_check_method = "head"
        "#;
        let cfg: FailoverConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.scheduler.workers, 4);
        assert_eq!(cfg.scheduler.interval_secs, 300);
        assert_eq!(cfg.accounts.len(), 1);
        let acc = &cfg.accounts[0];
        assert_eq!(acc.fail_limit, 2);
        assert_eq!(acc.health_check_interval_secs, 30);
        assert_eq!(acc.nodes[0].weight, 1);
        assert_eq!(acc.nodes[1].health_check_method, Some(HealthCheckMethod::Head));
        assert!(cfg.circuit_breaker.enabled);
        assert_eq!(cfg.warmup.timeout_ms, 17_000);
    }
}
