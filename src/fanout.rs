//! Multi-node query execution.
//!
//! One predicate, every authorized node, one time-sorted result.

pub mod executor;

pub use executor::{FanoutQuery, NodeFailurePolicy, NodeFanoutExecutor};
