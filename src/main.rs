//! Failover proxy control plane.
//!
//! # Architecture Overview
//!
//! ```text
//!     live request outcome ──▶ breaker ──▶ controller ──▶ registry (active node)
//!                                              ▲   │
//!                                              │   └──▶ warmup gate ──▶ probe
//!     re-check loop (failed nodes) ────────────┤
//!     health scheduler (all nodes) ────────────┘
//!
//!     controller ──▶ notifier (events)   controller ──▶ store (snapshots)
//!     admin dashboard ──▶ registry / breakers (read-only)
//! ```

use clap::Parser;
use std::path::PathBuf;

use failover_proxy::config::{loader, FailoverConfig};
use failover_proxy::lifecycle::{wait_for_shutdown, Services};
use failover_proxy::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "failover-proxy", version, about = "Failover control plane for upstream API nodes")]
struct Cli {
    /// TOML configuration file. Without one, defaults plus environment
    /// overrides are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => loader::load_config(path)?,
        None => {
            let mut config = FailoverConfig::default();
            loader::apply_env_overrides(&mut config);
            config
        }
    };
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "failover-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut services = Services::build(config)?;
    services.start().await?;

    wait_for_shutdown().await;
    services.shutdown().await;
    Ok(())
}
