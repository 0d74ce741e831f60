//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides: CB_*, WARMUP_*, HEALTH_*)
//!     → validation.rs (semantic checks)
//!     → FailoverConfig (validated, immutable)
//!     → handed to startup, which builds the subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Out-of-range tunables are normalized by their consumers, not rejected

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{
    AccountConfig, AdminConfig, CircuitBreakerConfig, FailoverConfig, HealthSchedulerConfig,
    NodeConfig, ObservabilityConfig, PersistenceConfig, ProbeConfig, WarmupConfig,
    MAX_HEALTH_WORKERS, MAX_WARMUP_CONCURRENCY,
};
