//! Persisted record shapes.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use crate::health::CheckSource;
use crate::registry::{HealthCheckMethod, Node};

/// Persistent view of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub url: String,
    pub weight: i64,
    pub failed: bool,
    pub disabled: bool,
    pub last_error: Option<String>,
    pub health_check_method: HealthCheckMethod,
    pub created_at: Option<SystemTime>,
    pub requests: u64,
    pub fail_count: u64,
    pub fail_streak: u64,
    pub last_ping_err: Option<String>,
    pub last_ping_ms: u64,
    pub last_health_check_at: Option<SystemTime>,
}

impl NodeRecord {
    pub fn from_node(account_id: &str, node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            account_id: account_id.to_string(),
            name: node.name.clone(),
            url: node.url.to_string(),
            weight: node.weight,
            failed: node.failed,
            disabled: node.disabled,
            last_error: node.last_error.clone(),
            health_check_method: node.health_check_method,
            created_at: node.created_at,
            requests: node.metrics.requests,
            fail_count: node.metrics.fail_count,
            fail_streak: node.metrics.fail_streak,
            last_ping_err: node.metrics.last_ping_err.clone(),
            last_ping_ms: node.metrics.last_ping_ms,
            last_health_check_at: node.metrics.last_health_check_at,
        }
    }
}

/// One probe result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub account_id: String,
    pub node_id: String,
    pub check_time: SystemTime,
    pub success: bool,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub check_method: HealthCheckMethod,
    pub check_source: CheckSource,
}

impl HealthCheckRecord {
    pub fn response_time(&self) -> Duration {
        Duration::from_millis(self.response_time_ms)
    }
}
