//! Shared health/failover types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by failover operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailoverError {
    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("no healthy node in account {0}")]
    NoHealthyNode(String),

    #[error("node {node} failed warmup: {successes}/{required} successful probes")]
    WarmupFailed {
        node: String,
        successes: u32,
        required: u32,
    },

    #[error("candidate {0} became ineligible before activation")]
    CandidateUnavailable(String),
}

/// What triggered a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSource {
    /// Full-fleet sweep.
    Scheduled,
    /// Re-check of a failed node.
    Recheck,
    /// Pre-promotion warmup attempt.
    Warmup,
}

impl CheckSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckSource::Scheduled => "scheduled",
            CheckSource::Recheck => "recheck",
            CheckSource::Warmup => "warmup",
        }
    }
}

impl fmt::Display for CheckSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one probe. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub error: Option<String>,
    pub latency: Duration,
}

impl ProbeOutcome {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            healthy: true,
            error: None,
            latency,
        }
    }

    pub fn unhealthy(error: impl Into<String>, latency: Duration) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
            latency,
        }
    }
}

/// The outcome of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activation {
    pub node_id: String,
    pub node_name: String,
    pub weight: i64,
    /// Active node before this call.
    pub previous: Option<String>,
}

impl Activation {
    /// True when the active node actually changed.
    pub fn changed(&self) -> bool {
        self.previous.as_deref() != Some(self.node_id.as_str())
    }
}
