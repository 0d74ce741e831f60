//! In-process store.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::store::{HealthCheckRecord, NodeRecord, NodeStore, StoreError};

/// Keeps the latest record per node and a bounded health-check history.
#[derive(Debug)]
pub struct MemoryStore {
    nodes: Mutex<HashMap<String, NodeRecord>>,
    history: Mutex<VecDeque<HealthCheckRecord>>,
    history_limit: usize,
}

impl MemoryStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .cloned()
    }

    pub fn nodes(&self) -> Vec<NodeRecord> {
        let mut all: Vec<_> = self
            .nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// History, oldest first.
    pub fn health_checks(&self) -> Vec<HealthCheckRecord> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub(crate) fn put_node(&self, record: NodeRecord) {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    pub(crate) fn push_health_check(&self, record: HealthCheckRecord) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(record);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn upsert_node(&self, record: NodeRecord) -> Result<(), StoreError> {
        self.put_node(record);
        Ok(())
    }

    async fn insert_health_check(&self, record: HealthCheckRecord) -> Result<(), StoreError> {
        self.push_health_check(record);
        Ok(())
    }
}
