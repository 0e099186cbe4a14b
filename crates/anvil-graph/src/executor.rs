//! Executor boundary
//!
//! The graph decides what runs and in what order; executors decide how.
//! Implementations (local process pool, distributed backends) are chosen by
//! explicit configuration, not probed from the environment. The contract:
//! independent actions may run concurrently, but an action must not start
//! before all of its prerequisite actions completed successfully, and a
//! failure is a hard stop.

use thiserror::Error;

use anvil_core::ActionType;

use crate::error::{GraphError, GraphResult};
use crate::graph::{ActionGraph, ActionId};

/// Failure of a single action, reported by an executor.
#[derive(Debug, Error)]
#[error("Failed to execute {description}: {message}")]
pub struct ExecutionError {
    /// Status description of the failing action.
    pub description: String,
    /// Executor-specific failure detail.
    pub message: String,
}

impl ExecutionError {
    /// Create an execution error for the given action.
    pub fn new(description: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            message: message.into(),
        }
    }
}

/// Runs an ordered action list.
pub trait ActionExecutor {
    /// Human-readable executor name for logging.
    fn name(&self) -> &str;

    /// Run the given actions, respecting prerequisite ordering.
    fn execute(&self, graph: &ActionGraph, ordered: &[ActionId]) -> Result<(), ExecutionError>;
}

/// Post-execution bookkeeping: drop cached metadata for everything the
/// executed actions touched, then verify that link outputs actually exist.
///
/// A link action whose declared output is missing after the executor
/// reported success indicates toolchain misbehavior and is surfaced
/// distinctly from a normal execution failure.
pub fn finish_execution(graph: &ActionGraph, executed: &[ActionId]) -> GraphResult<()> {
    for &id in executed {
        let action = &graph[id].action;
        for item in action
            .produced_items
            .iter()
            .chain(&action.delete_items)
        {
            item.reset_cached_info();
        }
    }

    for &id in executed {
        let action = &graph[id].action;
        if action.action_type != ActionType::Link {
            continue;
        }
        for item in &action.produced_items {
            if !item.exists() {
                return Err(GraphError::MissingProducedItem {
                    path: item.path().to_path_buf(),
                    command: action.full_command_line(),
                });
            }
        }
    }

    Ok(())
}
