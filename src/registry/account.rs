//! Account (tenant) abstraction.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::registry::node::Node;

/// Consecutive live-traffic failures before a node is demoted.
pub const DEFAULT_FAIL_LIMIT: u32 = 3;

/// Per-account failover tunables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSettings {
    pub retry_count: u32,
    /// Consecutive-failure threshold; 0 falls back to [`DEFAULT_FAIL_LIMIT`].
    pub fail_limit: u32,
    /// Re-check period for failed nodes; zero disables it for this account.
    pub health_check_interval: Duration,
}

impl AccountSettings {
    pub fn effective_fail_limit(&self) -> u64 {
        if self.fail_limit == 0 {
            DEFAULT_FAIL_LIMIT as u64
        } else {
            self.fail_limit as u64
        }
    }
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            retry_count: 3,
            fail_limit: DEFAULT_FAIL_LIMIT,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// A tenant owning a set of nodes and one active-node pointer.
///
/// `active_id`, when set, names a key of `nodes` that is not in `failed_set`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub active_id: Option<String>,
    pub nodes: HashMap<String, Node>,
    pub failed_set: HashSet<String>,
    pub settings: AccountSettings,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>, settings: AccountSettings) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active_id: None,
            nodes: HashMap::new(),
            failed_set: HashSet::new(),
            settings,
        }
    }

    pub fn active_node(&self) -> Option<&Node> {
        self.active_id.as_ref().and_then(|id| self.nodes.get(id))
    }

    /// Demote a node: flag it, track it in the failed set and drop the
    /// active pointer if it was the active node.
    pub(crate) fn mark_failed(&mut self, node_id: &str) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.failed = true;
            self.failed_set.insert(node_id.to_string());
            if self.active_id.as_deref() == Some(node_id) {
                self.active_id = None;
            }
        }
    }
}
