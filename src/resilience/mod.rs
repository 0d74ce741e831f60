//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to node:
//!     → circuit_breaker.rs (admission: allow_request)
//!     → request path talks to the node
//!     → circuit_breaker.rs (record_result, may open the circuit)
//! ```
//!
//! # Design Decisions
//! - Breakers are independent of the registry lock and never nest under it
//! - Circuit breaker prevents cascading failures

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitState};
