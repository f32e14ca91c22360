//! taskflow - a dependency-aware concurrent task executor.
//!
//! Tasks are linked by explicit dependency edges (or an implicit serial
//! chain) into a DAG. The executor dispatches each task once all of its
//! dependencies have resolved, bounded by a configurable concurrency limit,
//! and threads the merged results of a task's transitive ancestors into its
//! input payload. A failed task suppresses its entire unexecuted subtree
//! while independent branches run to completion.

// Core infrastructure modules
pub mod core {
    pub mod errors;
}

// The scheduling/execution engine
pub mod flow;

// Re-exports for convenience
pub use crate::core::errors::{Result, TaskFlowError};
pub use flow::*;
