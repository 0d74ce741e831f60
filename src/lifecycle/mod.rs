//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → Build subsystems → Start loops → Admin listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Loops exit → Scheduler stop (bounded)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown;
pub use startup::{Services, StartupError};
