//! Background writer in front of a [`NodeStore`].
//!
//! Writes are queued on an unbounded channel and applied in order by one
//! task, so callers never wait on the store.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{HealthCheckRecord, NodeRecord, NodeStore};

#[derive(Debug)]
enum StoreOp {
    Node(NodeRecord),
    HealthCheck(HealthCheckRecord),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking handle to the store task.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreOp>,
}

impl StoreWriter {
    /// Spawn the writer task. It exits once every handle is dropped and the
    /// queue is drained.
    pub fn spawn(store: Arc<dyn NodeStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(store, rx));
        (Self { tx }, handle)
    }

    pub fn upsert_node(&self, record: NodeRecord) {
        self.send(StoreOp::Node(record));
    }

    pub fn insert_health_check(&self, record: HealthCheckRecord) {
        self.send(StoreOp::HealthCheck(record));
    }

    /// Resolves once every write queued before this call has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.send(StoreOp::Flush(done));
        let _ = wait.await;
    }

    fn send(&self, op: StoreOp) {
        if self.tx.send(op).is_err() {
            tracing::debug!("Store writer closed; dropping write");
        }
    }
}

async fn run_writer(store: Arc<dyn NodeStore>, mut rx: mpsc::UnboundedReceiver<StoreOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            StoreOp::Node(record) => {
                let node_id = record.id.clone();
                if let Err(e) = store.upsert_node(record).await {
                    tracing::warn!(node_id = %node_id, error = %e, "Failed to persist node snapshot");
                }
            }
            StoreOp::HealthCheck(record) => {
                let node_id = record.node_id.clone();
                if let Err(e) = store.insert_health_check(record).await {
                    tracing::warn!(node_id = %node_id, error = %e, "Failed to record health check");
                }
            }
            StoreOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Store writer drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::CheckSource;
    use crate::registry::HealthCheckMethod;
    use crate::store::MemoryStore;
    use std::time::SystemTime;

    fn check(node_id: &str, success: bool) -> HealthCheckRecord {
        HealthCheckRecord {
            account_id: "acc".into(),
            node_id: node_id.into(),
            check_time: SystemTime::now(),
            success,
            response_time_ms: 4,
            error_message: None,
            check_method: HealthCheckMethod::Head,
            check_source: CheckSource::Scheduled,
        }
    }

    #[tokio::test]
    async fn test_writes_apply_in_order() {
        let store = Arc::new(MemoryStore::new(10));
        let (writer, _task) = StoreWriter::spawn(store.clone());

        writer.insert_health_check(check("n1", false));
        writer.insert_health_check(check("n1", true));
        writer.insert_health_check(check("n2", true));
        writer.flush().await;

        let history = store.health_checks();
        assert_eq!(history.len(), 3);
        assert!(!history[0].success);
        assert!(history[1].success);
        assert_eq!(history[2].node_id, "n2");
    }

    #[tokio::test]
    async fn test_task_exits_when_handles_dropped() {
        let store = Arc::new(MemoryStore::new(10));
        let (writer, task) = StoreWriter::spawn(store.clone());
        writer.insert_health_check(check("n1", true));
        drop(writer);

        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.health_checks().len(), 1);
    }
}
