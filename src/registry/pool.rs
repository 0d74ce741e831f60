//! Shared account/node registry.
//!
//! # Responsibilities
//! - Own every account and node of the process
//! - Guard them with one reader/writer lock
//! - Hand out cloned snapshots or run short closures under the lock
//!
//! The lock guard never leaves this module: `read` and `write` take
//! synchronous closures, so nothing can await while holding it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;
use url::Url;

use crate::config::AccountConfig;
use crate::registry::account::{Account, AccountSettings};
use crate::registry::node::Node;
use crate::registry::selection::{NodeSelector, WeightedPriority};

/// Errors raised when mutating the registry's shape.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("account not found: {0}")]
    UnknownAccount(String),

    #[error("duplicate account id: {0}")]
    DuplicateAccount(String),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("invalid url for node {node}: {source}")]
    InvalidUrl {
        node: String,
        #[source]
        source: url::ParseError,
    },
}

/// Data guarded by the registry lock.
#[derive(Debug, Default)]
pub struct RegistryState {
    accounts: HashMap<String, Account>,
    /// node id -> owning account id.
    node_index: HashMap<String, String>,
}

impl RegistryState {
    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn account_mut(&mut self, id: &str) -> Option<&mut Account> {
        self.accounts.get_mut(id)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn owner_of(&self, node_id: &str) -> Option<&str> {
        self.node_index.get(node_id).map(String::as_str)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        let acc = self.node_index.get(node_id)?;
        self.accounts.get(acc)?.nodes.get(node_id)
    }

    /// The owning account of a node, mutably.
    pub fn account_of_node_mut(&mut self, node_id: &str) -> Option<&mut Account> {
        let acc = self.node_index.get(node_id)?;
        self.accounts.get_mut(acc)
    }
}

/// Process-wide registry of accounts and nodes.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    inner: RwLock<RegistryState>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration. Each account starts on its
    /// best candidate, without warmup.
    pub fn from_config(configs: &[AccountConfig]) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for cfg in configs {
            let settings = AccountSettings {
                retry_count: cfg.retry_count,
                fail_limit: cfg.fail_limit,
                health_check_interval: Duration::from_secs(cfg.health_check_interval_secs),
            };
            let mut account = Account::new(cfg.id.clone(), cfg.name.clone(), settings);

            for node_cfg in &cfg.nodes {
                let url = Url::parse(&node_cfg.url).map_err(|source| RegistryError::InvalidUrl {
                    node: node_cfg.id.clone(),
                    source,
                })?;
                let mut node = Node::new(node_cfg.id.clone(), node_cfg.name.clone(), url, node_cfg.weight)
                    .with_created_at(
                        node_cfg
                            .created_at
                            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
                    );
                if let Some(key) = node_cfg.api_key.as_deref().filter(|k| !k.is_empty()) {
                    node = node.with_api_key(key);
                }
                if let Some(method) = node_cfg.health_check_method {
                    node.health_check_method = method;
                }
                node.disabled = node_cfg.disabled;
                if account.nodes.insert(node.id.clone(), node).is_some() {
                    return Err(RegistryError::DuplicateNode(node_cfg.id.clone()));
                }
            }

            account.active_id = WeightedPriority.select(&account).map(|n| n.id.clone());
            registry.insert_account(account)?;
        }
        Ok(registry)
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&RegistryState) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Run `f` under the write lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut RegistryState) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn insert_account(&self, account: Account) -> Result<(), RegistryError> {
        self.write(|state| {
            if state.accounts.contains_key(&account.id) {
                return Err(RegistryError::DuplicateAccount(account.id.clone()));
            }
            if let Some(dup) = account.nodes.keys().find(|id| state.node_index.contains_key(*id)) {
                return Err(RegistryError::DuplicateNode(dup.clone()));
            }
            for node_id in account.nodes.keys() {
                state.node_index.insert(node_id.clone(), account.id.clone());
            }
            state.accounts.insert(account.id.clone(), account);
            Ok(())
        })
    }

    pub fn add_node(&self, account_id: &str, node: Node) -> Result<(), RegistryError> {
        self.write(|state| {
            if state.node_index.contains_key(&node.id) {
                return Err(RegistryError::DuplicateNode(node.id.clone()));
            }
            let account = state
                .accounts
                .get_mut(account_id)
                .ok_or_else(|| RegistryError::UnknownAccount(account_id.to_string()))?;
            let node_id = node.id.clone();
            account.nodes.insert(node_id.clone(), node);
            state.node_index.insert(node_id, account_id.to_string());
            Ok(())
        })
    }

    /// Remove a node, clearing any active pointer or failed-set entry for it.
    pub fn remove_node(&self, node_id: &str) -> Option<Node> {
        self.write(|state| {
            let account_id = state.node_index.remove(node_id)?;
            let account = state.accounts.get_mut(&account_id)?;
            account.failed_set.remove(node_id);
            if account.active_id.as_deref() == Some(node_id) {
                account.active_id = None;
            }
            account.nodes.remove(node_id)
        })
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.read(|state| state.accounts.keys().cloned().collect())
    }

    pub fn node_ids(&self, account_id: &str) -> Vec<String> {
        self.read(|state| {
            state
                .account(account_id)
                .map(|acc| acc.nodes.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn all_node_ids(&self) -> Vec<String> {
        self.read(|state| state.node_index.keys().cloned().collect())
    }

    pub fn account_of(&self, node_id: &str) -> Option<String> {
        self.read(|state| state.owner_of(node_id).map(str::to_string))
    }

    pub fn node(&self, node_id: &str) -> Option<Node> {
        self.read(|state| state.node(node_id).cloned())
    }

    pub fn account(&self, account_id: &str) -> Option<Account> {
        self.read(|state| state.account(account_id).cloned())
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.read(|state| state.accounts.values().cloned().collect())
    }

    pub fn active_id(&self, account_id: &str) -> Option<String> {
        self.read(|state| state.account(account_id).and_then(|a| a.active_id.clone()))
    }

    pub fn is_failed(&self, node_id: &str) -> bool {
        self.read(|state| state.node(node_id).map(|n| n.failed).unwrap_or(false))
    }

    /// `(account_id, node_id)` for every entry of every failed set.
    pub fn failed_nodes(&self) -> Vec<(String, String)> {
        self.read(|state| {
            state
                .accounts
                .values()
                .flat_map(|acc| acc.failed_set.iter().map(move |id| (acc.id.clone(), id.clone())))
                .collect()
        })
    }

    /// Smallest positive re-check interval across accounts.
    pub fn min_health_interval(&self) -> Option<Duration> {
        self.read(|state| {
            state
                .accounts
                .values()
                .map(|acc| acc.settings.health_check_interval)
                .filter(|d| !d.is_zero())
                .min()
        })
    }

    /// Update a node's administrative exclusion flag.
    pub fn set_disabled(&self, node_id: &str, disabled: bool) -> bool {
        self.write(|state| {
            let Some(account) = state.account_of_node_mut(node_id) else {
                return false;
            };
            let Some(node) = account.nodes.get_mut(node_id) else {
                return false;
            };
            node.disabled = disabled;
            if disabled && account.active_id.as_deref() == Some(node_id) {
                account.active_id = None;
            }
            true
        })
    }
}
