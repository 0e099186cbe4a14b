//! End-to-end planning helpers
//!
//! Ties the stages together in their canonical order: prerequisite closure
//! for the requested outputs, whole-graph staleness analysis, scheduling
//! sort, and pre-execution cleanup. The result is the ordered list handed to
//! an executor.

use std::sync::Arc;

use anvil_cache::{ActionHistory, DependencyCache};
use anvil_core::FileItem;

use crate::context::BuildContext;
use crate::error::GraphResult;
use crate::executor::{finish_execution, ActionExecutor};
use crate::graph::{ActionGraph, ActionId};
use crate::outdated::{OutdatedChecker, OutdatedPolicy};
use crate::prepare::{create_directories_for_produced_items, delete_outdated_produced_items};

/// Compute the ordered, cleaned-up list of actions that must run to bring
/// the desired outputs up to date.
///
/// Staleness is evaluated over the prerequisite closure only. Actions
/// outside it are left untouched, including their history entries, so a
/// pending command-line change is still detected when a later build does
/// request their outputs.
pub fn plan_actions(
    graph: &ActionGraph,
    context: &BuildContext,
    history: &ActionHistory,
    dependency_cache: Option<&Arc<DependencyCache>>,
    policy: OutdatedPolicy,
    desired: &[Arc<FileItem>],
) -> GraphResult<Vec<ActionId>> {
    let closure = graph.gather_prerequisite_actions(desired);

    let checker = OutdatedChecker::new(graph, context, history, dependency_cache, policy);
    let mut to_execute = checker.gather_outdated_actions(&closure)?;
    graph.sort_action_list(&mut to_execute);

    delete_outdated_produced_items(graph, &to_execute)?;
    create_directories_for_produced_items(graph, &to_execute)?;

    log::debug!(
        "Build plan: {} of {} actions to execute",
        to_execute.len(),
        graph.len()
    );
    Ok(to_execute)
}

/// Run a plan through the given executor and perform the post-execution
/// bookkeeping (metadata reset, link output verification).
pub fn execute_plan(
    graph: &ActionGraph,
    plan: &[ActionId],
    executor: &dyn ActionExecutor,
) -> GraphResult<()> {
    if plan.is_empty() {
        log::debug!("Nothing to execute; all targets up to date");
        return Ok(());
    }

    log::debug!("Executing {} actions via {}", plan.len(), executor.name());
    executor.execute(graph, plan)?;
    finish_execution(graph, plan)
}
