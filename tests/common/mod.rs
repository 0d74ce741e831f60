//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    Router,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use failover_proxy::config::{AccountConfig, NodeConfig, WarmupConfig};
use failover_proxy::health::{HealthProbe, ProbeOutcome, ProbeTarget};

/// One request seen by a mock upstream.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub api_key: Option<String>,
    pub anthropic_version: Option<String>,
}

#[derive(Debug)]
struct MockState {
    status: AtomicU16,
    delay_ms: AtomicU64,
    body: Mutex<String>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Programmable upstream on an ephemeral port.
#[derive(Debug, Clone)]
pub struct MockUpstream {
    pub addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockUpstream {
    pub async fn start(status: u16) -> Self {
        let state = Arc::new(MockState {
            status: AtomicU16::new(status),
            delay_ms: AtomicU64::new(0),
            body: Mutex::new(String::new()),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_status(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_body(&self, body: impl Into<String>) {
        *self.state.body.lock().unwrap() = body.into();
    }

    pub fn hits(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> (StatusCode, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(RecordedRequest {
        method,
        path: uri.path().to_string(),
        api_key: header("x-api-key"),
        anthropic_version: header("anthropic-version"),
    });

    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = state.body.lock().unwrap().clone();
    (status, body)
}

/// Probe with per-node scripted behaviour. Nodes are healthy by default.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    unhealthy: Mutex<HashSet<String>>,
    panics: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn set_healthy(&self, node_id: &str, healthy: bool) {
        let mut unhealthy = self.unhealthy.lock().unwrap();
        if healthy {
            unhealthy.remove(node_id);
        } else {
            unhealthy.insert(node_id.to_string());
        }
    }

    pub fn panic_on(&self, node_id: &str) {
        self.panics.lock().unwrap().insert(node_id.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let should_panic = self.panics.lock().unwrap().contains(&target.node_id);
        if should_panic {
            panic!("scripted probe panic for {}", target.node_id);
        }

        if self.unhealthy.lock().unwrap().contains(&target.node_id) {
            ProbeOutcome::unhealthy("status 503", Duration::from_millis(1))
        } else {
            ProbeOutcome::healthy(Duration::from_millis(1))
        }
    }
}

pub fn node(id: &str, weight: i64, url: &str) -> NodeConfig {
    NodeConfig {
        id: id.into(),
        name: format!("Node {id}"),
        url: url.into(),
        api_key: None,
        weight,
        disabled: false,
        health_check_method: None,
        created_at: Some(1_700_000_000),
    }
}

pub fn account(id: &str, nodes: Vec<NodeConfig>) -> AccountConfig {
    AccountConfig {
        id: id.into(),
        name: id.into(),
        nodes,
        ..AccountConfig::default()
    }
}

pub fn warmup(enabled: bool) -> WarmupConfig {
    WarmupConfig {
        enabled,
        attempts: 2,
        timeout_ms: 2_000,
        required_success: 1,
        concurrency: 2,
    }
}
