//! Read-only admin surface.
//!
//! # Endpoints
//! - `GET /admin/status`: process and fleet summary
//! - `GET /admin/accounts`: accounts with nodes in selection order
//! - `GET /admin/breakers`: circuit breaker snapshots
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::registry::NodeRegistry;
use crate::resilience::BreakerRegistry;

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<NodeRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(registry: Arc<NodeRegistry>, breakers: Arc<BreakerRegistry>, api_key: &str) -> Self {
        Self {
            registry,
            breakers,
            api_key: Arc::from(api_key),
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/accounts", get(get_accounts))
        .route("/admin/breakers", get(get_breakers))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountConfig, CircuitBreakerConfig, NodeConfig};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> AdminState {
        let node = |id: &str, weight| NodeConfig {
            id: id.into(),
            name: id.into(),
            url: "http://127.0.0.1:9".into(),
            api_key: None,
            weight,
            disabled: false,
            health_check_method: None,
            created_at: None,
        };
        let registry = NodeRegistry::from_config(&[AccountConfig {
            id: "acc".into(),
            nodes: vec![node("b", 2), node("a", 1)],
            ..AccountConfig::default()
        }])
        .unwrap();
        let registry = Arc::new(registry);
        let breakers = Arc::new(BreakerRegistry::new(
            CircuitBreakerConfig::default(),
            registry.all_node_ids(),
        ));
        AdminState::new(registry, breakers, "secret")
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json(router: Router, req: Request<Body>) -> serde_json::Value {
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_missing_or_wrong_token() {
        let router = setup_admin_router(state());
        let resp = router.clone().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router.oneshot(get("/admin/status", Some("nope"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_counts_fleet() {
        let doc = json(setup_admin_router(state()), get("/admin/status", Some("secret"))).await;
        assert_eq!(doc["status"], "operational");
        assert_eq!(doc["accounts"], 1);
        assert_eq!(doc["nodes"], 2);
        assert_eq!(doc["failed_nodes"], 0);
    }

    #[tokio::test]
    async fn test_accounts_list_nodes_in_selection_order() {
        let doc = json(setup_admin_router(state()), get("/admin/accounts", Some("secret"))).await;
        let account = &doc[0];
        assert_eq!(account["active_id"], "a");
        assert_eq!(account["nodes"][0]["id"], "a");
        assert_eq!(account["nodes"][0]["active"], true);
        assert_eq!(account["nodes"][1]["id"], "b");
        assert_eq!(account["nodes"][1]["health_check_method"], "head");
    }

    #[tokio::test]
    async fn test_breakers_report_state() {
        let doc = json(setup_admin_router(state()), get("/admin/breakers", Some("secret"))).await;
        assert_eq!(doc.as_array().map(Vec::len), Some(2));
        assert_eq!(doc[0]["resource"], "a");
        assert_eq!(doc[0]["state"], "closed");
    }
}
