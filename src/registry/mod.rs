//! Account and node registry.
//!
//! # Data Flow
//! ```text
//! config accounts/nodes
//!     → pool.rs (NodeRegistry: accounts → nodes, one RwLock)
//!     → selection.rs (weight / created_at order, promotion target)
//!
//! Readers (selection, dashboards) take snapshots under the read lock.
//! Mutators (demotion, promotion, metric updates) run one closure
//! under the write lock. No I/O happens inside either.
//! ```

pub mod account;
pub mod node;
pub mod pool;
pub mod selection;

pub use account::{Account, AccountSettings, DEFAULT_FAIL_LIMIT};
pub use node::{HealthCheckMethod, Node, NodeMetrics};
pub use pool::{NodeRegistry, RegistryError, RegistryState};
pub use selection::{compare_priority, ordered_nodes, NodeSelector, WeightedPriority};
