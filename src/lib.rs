//! Failover control plane for a pool of upstream API nodes.

pub mod admin;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod notify;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod store;

pub use config::schema::FailoverConfig;
pub use health::FailoverController;
pub use lifecycle::{Services, Shutdown};
pub use registry::NodeRegistry;
