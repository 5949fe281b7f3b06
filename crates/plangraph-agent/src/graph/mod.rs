//! Graph execution engine.
//!
//! A pipeline is a directed acyclic graph of [`Node`]s. Each node reads a
//! snapshot of the shared [`RunState`] and returns a [`StateDiff`]; the
//! [`GraphExecutor`] owns the state, runs ready nodes level by level
//! (siblings concurrently), merges their diffs and checkpoints after every
//! merge so an interrupted run can resume.

pub mod builder;
pub mod executor;
pub mod node;
pub mod state;

pub use builder::{Graph, GraphBuilder};
pub use executor::{ExecutionResult, GraphExecutor, NodeResult};
pub use node::{Node, NodeContext};
pub use state::{RunState, StateDiff};
