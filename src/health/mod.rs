//! Health checking and failover subsystem.
//!
//! # Data Flow
//! ```text
//! Live traffic (controller.rs):
//!     Request failure reported
//!     → fail_streak += 1
//!     → fail_limit reached: demote, notify, select replacement
//!
//! Re-check loop (controller.rs):
//!     Ticker at the smallest account interval
//!     → probe every node in a failed set
//!     → healthy: clear failure state, notify, reconsider promotion
//!
//! Full sweep (scheduler.rs):
//!     Ticker at the sweep interval
//!     → bounded workers probe every node before a shared deadline
//!
//! Promotion (controller.rs + warmup.rs):
//!     Best candidate by weight / created_at
//!     → warmup gate (process-wide slots, per-attempt timeout)
//!     → active_id updated
//! ```
//!
//! # Design Decisions
//! - Probes go through the `HealthProbe` seam (probe.rs)
//! - Probe failures are values; only missing accounts/nodes are errors
//! - The registry lock is never held across a probe

pub mod controller;
pub mod probe;
pub mod scheduler;
pub mod types;
pub mod warmup;

pub use controller::FailoverController;
pub use probe::{HealthProbe, HttpProbe, ProbeTarget};
pub use scheduler::{HealthScheduler, SchedulerSettings, SweepReport};
pub use types::{Activation, CheckSource, FailoverError, ProbeOutcome};
pub use warmup::{is_node_warmed_up, WarmupProber};
