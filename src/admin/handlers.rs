use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::registry::{ordered_nodes, Account, HealthCheckMethod, Node};
use crate::resilience::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub accounts: usize,
    pub nodes: usize,
    pub failed_nodes: usize,
}

#[derive(Serialize)]
pub struct NodeView {
    pub id: String,
    pub name: String,
    pub url: String,
    pub weight: i64,
    pub active: bool,
    pub failed: bool,
    pub disabled: bool,
    pub last_error: Option<String>,
    pub health_check_method: HealthCheckMethod,
    pub requests: u64,
    pub fail_count: u64,
    pub fail_streak: u64,
    pub last_ping_ms: u64,
    pub last_ping_err: Option<String>,
}

impl NodeView {
    fn new(node: &Node, active: bool) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            url: node.url.to_string(),
            weight: node.weight,
            active,
            failed: node.failed,
            disabled: node.disabled,
            last_error: node.last_error.clone(),
            health_check_method: node.effective_check_method(),
            requests: node.metrics.requests,
            fail_count: node.metrics.fail_count,
            fail_streak: node.metrics.fail_streak,
            last_ping_ms: node.metrics.last_ping_ms,
            last_ping_err: node.metrics.last_ping_err.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct AccountView {
    pub id: String,
    pub name: String,
    pub active_id: Option<String>,
    pub failed: Vec<String>,
    /// Selection order.
    pub nodes: Vec<NodeView>,
}

impl AccountView {
    fn new(account: &Account) -> Self {
        let mut failed: Vec<String> = account.failed_set.iter().cloned().collect();
        failed.sort();
        let nodes = ordered_nodes(account)
            .into_iter()
            .map(|n| NodeView::new(n, account.active_id.as_deref() == Some(n.id.as_str())))
            .collect();
        Self {
            id: account.id.clone(),
            name: account.name.clone(),
            active_id: account.active_id.clone(),
            failed,
            nodes,
        }
    }
}

#[derive(Serialize)]
pub struct BreakerView {
    pub resource: String,
    #[serde(flatten)]
    pub snapshot: BreakerSnapshot,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let (accounts, nodes, failed_nodes) = state.registry.read(|s| {
        s.accounts().fold((0, 0, 0), |(a, n, f), acc| {
            (a + 1, n + acc.nodes.len(), f + acc.failed_set.len())
        })
    });

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        accounts,
        nodes,
        failed_nodes,
    })
}

pub async fn get_accounts(State(state): State<AdminState>) -> Json<Vec<AccountView>> {
    let mut views: Vec<AccountView> = state
        .registry
        .read(|s| s.accounts().map(AccountView::new).collect());
    views.sort_by(|a, b| a.id.cmp(&b.id));
    Json(views)
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerView>> {
    Json(
        state
            .breakers
            .snapshots()
            .into_iter()
            .map(|(resource, snapshot)| BreakerView { resource, snapshot })
            .collect(),
    )
}
