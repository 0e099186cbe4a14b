//! Pre-execution cleanup
//!
//! Before the executor runs, outputs of outdated actions are removed so a
//! failed command cannot leave a stale file that looks current on the next
//! build, and output directories are created so commands need not do it
//! themselves.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{GraphError, GraphResult};
use crate::graph::{ActionGraph, ActionId};

/// Delete the produced and delete-items of every outdated action.
pub fn delete_outdated_produced_items(
    graph: &ActionGraph,
    outdated: &[ActionId],
) -> GraphResult<()> {
    for &id in outdated {
        let action = &graph[id].action;
        for item in action.produced_items.iter().chain(&action.delete_items) {
            if !item.exists() {
                continue;
            }
            log::debug!("Deleting outdated item: {item}");
            std::fs::remove_file(item.path()).map_err(|e| GraphError::io(item.path(), e))?;
            item.reset_cached_info();
        }
    }
    Ok(())
}

/// Create the directories the outdated actions will write into.
pub fn create_directories_for_produced_items(
    graph: &ActionGraph,
    outdated: &[ActionId],
) -> GraphResult<()> {
    let mut directories: HashSet<PathBuf> = HashSet::new();
    for &id in outdated {
        for item in &graph[id].action.produced_items {
            if let Some(parent) = item.path().parent() {
                directories.insert(parent.to_path_buf());
            }
        }
    }

    for directory in directories {
        std::fs::create_dir_all(&directory).map_err(|e| GraphError::io(&directory, e))?;
    }
    Ok(())
}
