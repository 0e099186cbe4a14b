//! Anvil action graph and staleness engine
//!
//! The engine that decides what a build has to run and in what order:
//! - Links flat action lists into a DAG over produced/prerequisite files,
//!   rejecting cycles and conflicting producers
//! - Determines which actions are outdated from timestamps, command-line
//!   history, and transitively discovered header dependencies
//! - Computes the minimal closure for a requested output set and orders it
//!   to maximize the executor's exploitable parallelism
//! - Cleans up stale outputs and hands the ordered list to a pluggable
//!   executor
//!
//! How the actions actually run is out of scope: executors implement
//! `ActionExecutor` and are chosen by configuration.

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod outdated;
pub mod pipeline;
pub mod prepare;

// Re-export main types
pub use context::BuildContext;
pub use error::{CyclicAction, GraphError, GraphResult};
pub use executor::{finish_execution, ActionExecutor, ExecutionError};
pub use graph::{ActionGraph, ActionId, LinkedAction};
pub use outdated::{OutdatedChecker, OutdatedPolicy, DEFAULT_TIMESTAMP_SLACK};
pub use pipeline::{execute_plan, plan_actions};
pub use prepare::{create_directories_for_produced_items, delete_outdated_produced_items};
