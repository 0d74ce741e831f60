//! JSON snapshot file store.
//!
//! Every write rewrites the whole snapshot through a temporary file and a
//! rename, so readers never observe a half-written document.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::store::memory::MemoryStore;
use crate::store::{HealthCheckRecord, NodeRecord, NodeStore, StoreError};

#[derive(Serialize)]
struct Snapshot<'a> {
    nodes: &'a [NodeRecord],
    health_checks: &'a [HealthCheckRecord],
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: MemoryStore,
    /// Serializes file writes.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, history_limit: usize) -> Self {
        Self {
            path: path.into(),
            records: MemoryStore::new(history_limit),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let nodes = self.records.nodes();
        let health_checks = self.records.health_checks();
        let body = serde_json::to_vec_pretty(&Snapshot {
            nodes: &nodes,
            health_checks: &health_checks,
        })?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl NodeStore for JsonFileStore {
    async fn upsert_node(&self, record: NodeRecord) -> Result<(), StoreError> {
        self.records.put_node(record);
        self.flush().await
    }

    async fn insert_health_check(&self, record: HealthCheckRecord) -> Result<(), StoreError> {
        self.records.push_health_check(record);
        self.flush().await
    }
}
