//! Node health probes.
//!
//! # Responsibilities
//! - Define the probe seam used by the controller, warmup and scheduler
//! - Implement the two wire methods over HTTP
//!
//! # Probe methods
//! - API: `POST {url}/v1/messages` with a one-token chat request; any 2xx is healthy
//! - HEAD: `HEAD {url}`; exactly 200 is healthy

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::fmt;
use std::time::{Duration, Instant};
use url::Url;

use crate::config::ProbeConfig;
use crate::health::types::ProbeOutcome;
use crate::registry::{HealthCheckMethod, Node};

/// Everything a probe needs, copied out of the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTarget {
    pub node_id: String,
    pub node_name: String,
    pub url: Url,
    pub api_key: Option<String>,
    pub method: HealthCheckMethod,
}

impl ProbeTarget {
    pub fn from_node(node: &Node) -> Self {
        Self {
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            url: node.url.clone(),
            api_key: node.api_key.clone(),
            method: node.effective_check_method(),
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync + fmt::Debug {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome;
}

/// `reqwest`-backed probe.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    config: ProbeConfig,
}

impl HttpProbe {
    pub fn new(config: ProbeConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("failover-proxy/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    async fn probe_api(&self, target: &ProbeTarget) -> Result<Response, reqwest::Error> {
        let url = format!("{}/v1/messages", target.url.as_str().trim_end_matches('/'));
        let key = target.api_key.as_deref().unwrap_or_default();
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "hi" }],
        });

        self.client
            .post(url)
            .header("anthropic-version", &self.config.api_version)
            .header("x-api-key", key)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
    }

    /// First `error_body_limit` bytes of the body, lossily decoded.
    async fn error_body(&self, mut response: Response) -> String {
        let limit = self.config.error_body_limit;
        let mut buf = Vec::new();
        while buf.len() < limit {
            match response.chunk().await {
                Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
                _ => break,
            }
        }
        buf.truncate(limit);
        String::from_utf8_lossy(&buf).trim().to_string()
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        let started = Instant::now();

        let result = match target.method {
            HealthCheckMethod::Api => self.probe_api(target).await,
            HealthCheckMethod::Head => self.client.head(target.url.clone()).send().await,
        };

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                let error = if e.is_timeout() {
                    format!("timeout after {}s", self.config.timeout_secs)
                } else {
                    format!("request failed: {e}")
                };
                return ProbeOutcome::unhealthy(error, started.elapsed());
            }
        };

        let status = response.status();
        match target.method {
            HealthCheckMethod::Api if status.is_success() => ProbeOutcome::healthy(started.elapsed()),
            HealthCheckMethod::Api => {
                let body = self.error_body(response).await;
                ProbeOutcome::unhealthy(format!("status {}: {}", status.as_u16(), body), started.elapsed())
            }
            HealthCheckMethod::Head if status == StatusCode::OK => ProbeOutcome::healthy(started.elapsed()),
            HealthCheckMethod::Head => {
                ProbeOutcome::unhealthy(format!("status {}", status.as_u16()), started.elapsed())
            }
        }
    }
}
