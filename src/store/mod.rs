//! Best-effort persistence of node snapshots and health-check history.
//!
//! # Data Flow
//! ```text
//! controller state transition (under registry lock)
//!     → NodeRecord / HealthCheckRecord built from the mutated node
//!     → lock released
//!     → StoreWriter (unbounded mpsc, never blocks the caller)
//!     → NodeStore::upsert_node / insert_health_check
//!     → failure logged, never propagated
//! ```

pub mod file;
pub mod memory;
pub mod records;
pub mod writer;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use records::{HealthCheckRecord, NodeRecord};
pub use writer::StoreWriter;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persistence collaborator of the failover controller.
#[async_trait]
pub trait NodeStore: Send + Sync + fmt::Debug {
    async fn upsert_node(&self, record: NodeRecord) -> Result<(), StoreError>;

    async fn insert_health_check(&self, record: HealthCheckRecord) -> Result<(), StoreError>;
}
