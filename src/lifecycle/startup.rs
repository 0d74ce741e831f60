//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated configuration, in dependency
//!   order: registry, breakers, store, notifier, controller, scheduler
//! - Start and stop the background loops
//!
//! # Design Decisions
//! - Fail fast: any construction error is fatal
//! - The admin listener starts last

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::FailoverConfig;
use crate::health::{FailoverController, HealthProbe, HealthScheduler, HttpProbe, SchedulerSettings};
use crate::lifecycle::Shutdown;
use crate::notify::{spawn_log_sink, ChannelNotifier};
use crate::registry::{NodeRegistry, RegistryError};
use crate::resilience::BreakerRegistry;
use crate::store::{JsonFileStore, MemoryStore, NodeStore, StoreWriter};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid address '{0}'")]
    Address(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every long-lived component of the process.
#[derive(Debug)]
pub struct Services {
    pub config: FailoverConfig,
    pub registry: Arc<NodeRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub controller: Arc<FailoverController>,
    pub scheduler: Arc<HealthScheduler>,
    pub shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    log_sink: JoinHandle<()>,
    store_writer: JoinHandle<()>,
}

impl Services {
    /// Build everything with the HTTP probe. Must run inside a Tokio runtime.
    pub fn build(config: FailoverConfig) -> Result<Self, StartupError> {
        let probe = Arc::new(HttpProbe::new(config.probe.clone())?);
        Self::build_with_probe(config, probe)
    }

    pub fn build_with_probe(config: FailoverConfig, probe: Arc<dyn HealthProbe>) -> Result<Self, StartupError> {
        let registry = Arc::new(NodeRegistry::from_config(&config.accounts)?);
        let breakers = Arc::new(BreakerRegistry::new(
            config.circuit_breaker.clone(),
            registry.all_node_ids(),
        ));

        let store: Arc<dyn NodeStore> = match &config.persistence.path {
            Some(path) => Arc::new(JsonFileStore::new(path, config.persistence.history_limit)),
            None => Arc::new(MemoryStore::new(config.persistence.history_limit)),
        };
        let (store, store_writer) = StoreWriter::spawn(store);

        let (notifier, events) = ChannelNotifier::new();
        let log_sink = spawn_log_sink(events);

        let controller = Arc::new(
            FailoverController::new(Arc::clone(&registry), probe, config.warmup.clone())
                .with_store(store)
                .with_notifier(Arc::new(notifier))
                .with_breakers(Arc::clone(&breakers)),
        );
        let scheduler = Arc::new(HealthScheduler::new(
            Arc::clone(&controller),
            SchedulerSettings::from_config(&config.scheduler),
        ));

        let shutdown = Shutdown::new();

        tracing::info!(
            accounts = registry.account_ids().len(),
            nodes = registry.all_node_ids().len(),
            warmup = controller.warmup().config().enabled,
            breakers = config.circuit_breaker.enabled,
            "Services initialized"
        );

        Ok(Self {
            config,
            registry,
            breakers,
            controller,
            scheduler,
            shutdown,
            tasks: Vec::new(),
            log_sink,
            store_writer,
        })
    }

    /// Start the sweep scheduler, the re-check loop and, when enabled, the
    /// admin listener.
    pub async fn start(&mut self) -> Result<Option<SocketAddr>, StartupError> {
        self.scheduler.start();

        let controller = Arc::clone(&self.controller);
        self.tasks
            .push(tokio::spawn(controller.run_recheck_loop(self.shutdown.subscribe())));

        if !self.config.admin.enabled {
            return Ok(None);
        }

        let addr: SocketAddr = self
            .config
            .admin
            .bind_address
            .parse()
            .map_err(|_| StartupError::Address(self.config.admin.bind_address.clone()))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;

        let router = setup_admin_router(AdminState::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.breakers),
            &self.config.admin.api_key,
        ));
        let signalled = self.shutdown.signalled();
        self.tasks.push(tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(signalled);
            if let Err(e) = server.await {
                tracing::error!(error = %e, "Admin server failed");
            }
        }));

        tracing::info!(address = %local, "Admin dashboard listening");
        Ok(Some(local))
    }

    /// Stop every background loop.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        self.shutdown.trigger();
        self.scheduler.stop().await;

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        // The log sink and the store writer drain until the controller is
        // dropped; detached warmup attempts and checks may still hold it.
        if tokio::time::timeout(Duration::from_secs(5), self.controller.flush_store()).await.is_err() {
            tracing::warn!("Store writes still pending at shutdown");
        }
        drop(self.scheduler);
        drop(self.controller);
        drain(self.store_writer, "Store writer").await;
        drain(self.log_sink, "Log sink").await;
        tracing::info!("Shutdown complete");
    }
}

async fn drain(mut task: JoinHandle<()>, name: &str) {
    if tokio::time::timeout(Duration::from_secs(1), &mut task).await.is_err() {
        tracing::debug!(task = name, "Task still busy at shutdown; aborting");
        task.abort();
    }
}
