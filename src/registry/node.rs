//! Upstream node abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream endpoint of an account
//! - Track demotion (`failed`) and administrative exclusion (`disabled`)
//! - Carry the per-node request and probe metrics

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use url::Url;

/// How a node is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckMethod {
    /// Minimal synthetic chat request against `/v1/messages`.
    Api,
    /// `HEAD` against the node root.
    Head,
}

impl HealthCheckMethod {
    /// Default method for a node: API style when it carries a key.
    pub fn for_key(api_key: Option<&str>) -> Self {
        match api_key {
            Some(k) if !k.is_empty() => HealthCheckMethod::Api,
            _ => HealthCheckMethod::Head,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthCheckMethod::Api => "api",
            HealthCheckMethod::Head => "head",
        }
    }
}

/// Request and probe counters of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeMetrics {
    pub requests: u64,
    pub fail_count: u64,
    /// Consecutive failures since the last success.
    pub fail_streak: u64,
    pub last_ping_err: Option<String>,
    pub last_ping_ms: u64,
    pub last_health_check_at: Option<SystemTime>,
    pub total_bytes: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub stream_duration_ms: u64,
    pub first_byte_ms: u64,
}

/// A single upstream node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub url: Url,
    /// Presence selects the API-style probe.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Lower value wins selection.
    pub weight: i64,
    pub failed: bool,
    pub disabled: bool,
    pub last_error: Option<String>,
    pub health_check_method: HealthCheckMethod,
    /// `None` is the zero time and sorts before any set time.
    pub created_at: Option<SystemTime>,
    pub metrics: NodeMetrics,
}

impl Node {
    /// Create a healthy node stamped with the current time.
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: Url, weight: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url,
            api_key: None,
            weight,
            failed: false,
            disabled: false,
            last_error: None,
            health_check_method: HealthCheckMethod::Head,
            created_at: Some(SystemTime::now()),
            metrics: NodeMetrics::default(),
        }
    }

    /// Attach an API key and switch to the API-style probe.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.health_check_method = HealthCheckMethod::for_key(Some(&key));
        self.api_key = Some(key);
        self
    }

    pub fn with_created_at(mut self, created_at: Option<SystemTime>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Eligible for selection.
    pub fn is_candidate(&self) -> bool {
        !self.disabled && !self.failed
    }

    /// Method actually used to probe: `Api` needs a key.
    pub fn effective_check_method(&self) -> HealthCheckMethod {
        match (self.health_check_method, self.api_key.as_deref()) {
            (HealthCheckMethod::Api, Some(k)) if !k.is_empty() => HealthCheckMethod::Api,
            _ => HealthCheckMethod::Head,
        }
    }

    /// Clear every failure marker after a healthy probe.
    pub(crate) fn mark_recovered(&mut self) {
        self.failed = false;
        self.last_error = None;
        self.metrics.fail_streak = 0;
        self.metrics.last_ping_err = None;
    }

    pub(crate) fn record_probe(&mut self, at: SystemTime, latency: Duration) {
        self.metrics.last_health_check_at = Some(at);
        self.metrics.last_ping_ms = latency.as_millis() as u64;
    }
}
