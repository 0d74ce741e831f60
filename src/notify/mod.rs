//! Domain event notification.
//!
//! # Data Flow
//! ```text
//! controller (demotion / recovery)
//!     → Notifier::publish (non-blocking)
//!     → ChannelNotifier (unbounded mpsc)
//!     → spawn_log_sink (collapses repeats, logs)
//! ```
//!
//! # Design Decisions
//! - Publishing never blocks and never fails the caller
//! - The dedup key is the node ID, so repeated identical events collapse

use serde::Serialize;
use std::fmt;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeFailed,
    NodeRecovered,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NodeFailed => "node_failed",
            EventType::NodeRecovered => "node_recovered",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub account_id: String,
    pub event_type: EventType,
    pub title: String,
    pub content: String,
    pub dedup_key: String,
    pub occurred_at: SystemTime,
}

impl Event {
    pub fn node_failed(account_id: &str, node_id: &str, node_name: &str, error: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            event_type: EventType::NodeFailed,
            title: format!("Node {node_name} failed"),
            content: format!("Node {node_name} ({node_id}) was demoted: {error}"),
            dedup_key: node_id.to_string(),
            occurred_at: SystemTime::now(),
        }
    }

    pub fn node_recovered(account_id: &str, node_id: &str, node_name: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            event_type: EventType::NodeRecovered,
            title: format!("Node {node_name} recovered"),
            content: format!("Node {node_name} ({node_id}) passed its health check"),
            dedup_key: node_id.to_string(),
            occurred_at: SystemTime::now(),
        }
    }
}

/// Fire-and-forget event sink.
pub trait Notifier: Send + Sync + fmt::Debug {
    fn publish(&self, event: Event);
}

/// Notifier backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn publish(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Notification sink closed; dropping event");
        }
    }
}

/// Drops an event that repeats the previous `(event_type, dedup_key)`.
#[derive(Debug, Default)]
pub struct Deduplicator {
    last: Option<(EventType, String)>,
}

impl Deduplicator {
    /// True when `event` should be delivered.
    pub fn admit(&mut self, event: &Event) -> bool {
        let key = (event.event_type, event.dedup_key.clone());
        if self.last.as_ref() == Some(&key) {
            return false;
        }
        self.last = Some(key);
        true
    }
}

/// Drain `rx` into the log until every sender is gone.
pub fn spawn_log_sink(mut rx: mpsc::UnboundedReceiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut dedup = Deduplicator::default();
        while let Some(event) = rx.recv().await {
            if !dedup.admit(&event) {
                tracing::debug!(
                    event = %event.event_type,
                    key = %event.dedup_key,
                    "Collapsed duplicate notification"
                );
                continue;
            }
            tracing::info!(
                account = %event.account_id,
                event = %event.event_type,
                key = %event.dedup_key,
                title = %event.title,
                "{}",
                event.content
            );
        }
    })
}
