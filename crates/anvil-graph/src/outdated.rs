//! Staleness determination
//!
//! The central correctness-critical algorithm: an action is outdated when its
//! cached outputs are not guaranteed to reflect its current inputs and
//! command line. The check is recursive over prerequisite actions and
//! memoized per action; the whole-graph driver prefetches dependency lists
//! and evaluates actions in parallel. Recomputing the same action twice is
//! harmless (the answer is pure given fixed filesystem state), so the memo
//! only synchronizes the final insert.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use rayon::prelude::*;

use anvil_cache::{ActionHistory, CacheError, DependencyCache};
use anvil_core::{ActionType, FileItem};

use crate::context::BuildContext;
use crate::error::GraphResult;
use crate::graph::{ActionGraph, ActionId};

/// Tolerance when comparing prerequisite write times against the action's
/// last execution time. Absorbs the clock skew a network copy can introduce.
pub const DEFAULT_TIMESTAMP_SLACK: Duration = Duration::from_secs(1);

/// Tunable policy knobs for the staleness check.
#[derive(Debug, Clone)]
pub struct OutdatedPolicy {
    /// Prerequisites newer than the last execution time by no more than
    /// this much do not mark the action outdated.
    pub timestamp_slack: Duration,
    /// Object extensions for which a zero-length file means an aborted
    /// compile rather than a valid output.
    pub aborted_object_extensions: Vec<String>,
    /// Extensions treated as import libraries for the exception below.
    pub import_library_extensions: Vec<String>,
    /// When set, an outdated prerequisite that only matters as an import
    /// library does not force a relink by itself. Import-library changes
    /// rarely require relinking unless a public header also changed.
    pub ignore_outdated_import_libraries: bool,
}

impl Default for OutdatedPolicy {
    fn default() -> Self {
        Self {
            timestamp_slack: DEFAULT_TIMESTAMP_SLACK,
            aborted_object_extensions: vec!["obj".to_string(), "o".to_string()],
            import_library_extensions: vec!["lib".to_string()],
            ignore_outdated_import_libraries: false,
        }
    }
}

impl OutdatedPolicy {
    /// Policy with the import-library exception engaged.
    pub fn ignoring_import_libraries() -> Self {
        Self {
            ignore_outdated_import_libraries: true,
            ..Self::default()
        }
    }
}

/// Per-run memoized staleness checker over one linked graph.
pub struct OutdatedChecker<'a> {
    graph: &'a ActionGraph,
    context: &'a BuildContext,
    history: &'a ActionHistory,
    dependency_cache: Option<&'a Arc<DependencyCache>>,
    policy: OutdatedPolicy,
    results: RwLock<HashMap<ActionId, bool>>,
}

impl<'a> OutdatedChecker<'a> {
    /// Create a checker for one evaluation pass.
    pub fn new(
        graph: &'a ActionGraph,
        context: &'a BuildContext,
        history: &'a ActionHistory,
        dependency_cache: Option<&'a Arc<DependencyCache>>,
        policy: OutdatedPolicy,
    ) -> Self {
        Self {
            graph,
            context,
            history,
            dependency_cache,
            policy,
            results: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the action must be re-run. Memoized and idempotent.
    pub fn is_outdated(&self, id: ActionId) -> bool {
        if let Some(&cached) = self
            .results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
        {
            return cached;
        }

        let outdated = self.compute(id);
        self.results
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, outdated);
        outdated
    }

    fn compute(&self, id: ActionId) -> bool {
        let linked = &self.graph[id];
        let action = &linked.action;
        let command_line = action.full_command_line();

        // A changed command line invalidates the outputs no matter what the
        // timestamps say. All produced items are checked so the history is
        // fully refreshed for the next run.
        let mut command_changed = false;
        for item in &action.produced_items {
            if self
                .history
                .update_producing_command_line(item, &command_line)
            {
                log::debug!("{action}: command line changed for {item}");
                command_changed = true;
            }
        }
        if command_changed {
            return true;
        }

        // The action last ran no later than its oldest surviving output.
        let mut last_execution_time: Option<SystemTime> = None;
        for item in &action.produced_items {
            let info = item.info();
            if !info.exists {
                log::debug!("{action}: produced item {item} is missing");
                return true;
            }
            if action.action_type == ActionType::Compile
                && info.size == 0
                && self
                    .policy
                    .aborted_object_extensions
                    .iter()
                    .any(|ext| item.has_extension(ext))
            {
                // Zero-length object left behind by an aborted compile.
                log::debug!("{action}: produced item {item} is empty");
                return true;
            }
            last_execution_time = Some(match last_execution_time {
                Some(earliest) => earliest.min(info.last_write_time),
                None => info.last_write_time,
            });
        }
        let Some(last_execution_time) = last_execution_time else {
            return true;
        };
        let threshold = last_execution_time + self.policy.timestamp_slack;

        for item in &action.prerequisite_items {
            let ignorable = self.is_ignorable_import_library(item);

            if let Some(producer) = self.graph.producer_of(item) {
                if producer != id && self.is_outdated(producer) && !ignorable {
                    log::debug!("{action}: prerequisite action for {item} is outdated");
                    return true;
                }
            }

            let info = item.info();
            if info.exists && info.last_write_time > threshold && !ignorable {
                log::debug!("{action}: prerequisite {item} is newer than outputs");
                return true;
            }
        }

        if let Some(list_file) = &action.dependency_list_file {
            match self.dependencies_of(list_file) {
                Some(files) => {
                    for file in &files {
                        let info = file.info();
                        if info.exists && info.last_write_time > threshold {
                            log::debug!("{action}: discovered dependency {file} is newer");
                            return true;
                        }
                    }
                }
                // No usable dependency list: assume the worst.
                None => return true,
            }
        }

        false
    }

    /// Whether the import-library exception suppresses this prerequisite.
    fn is_ignorable_import_library(&self, item: &Arc<FileItem>) -> bool {
        if !self.policy.ignore_outdated_import_libraries {
            return false;
        }
        if !self
            .policy
            .import_library_extensions
            .iter()
            .any(|ext| item.has_extension(ext))
        {
            return false;
        }
        match self.graph.producer_of(item) {
            Some(producer) => self.graph[producer].action.produces_import_library,
            None => false,
        }
    }

    fn dependencies_of(&self, list_file: &Arc<FileItem>) -> Option<Vec<Arc<FileItem>>> {
        let cache = self.dependency_cache?;
        match cache.get_dependencies(list_file, &self.context.files) {
            Ok(files) => files,
            Err(err) => {
                log::warn!("Treating {list_file} as unresolvable: {err}");
                None
            }
        }
    }

    /// Warm the dependency cache for every distinct dependency list file
    /// among the given actions.
    ///
    /// The recursive per-action check would otherwise serialize on cache
    /// misses. Unreadable lists degrade to misses inside the cache; an
    /// unknown list format is a tooling mismatch and aborts.
    pub fn prefetch_dependency_lists(&self, ids: &[ActionId]) -> GraphResult<()> {
        let Some(cache) = self.dependency_cache else {
            return Ok(());
        };

        let mut seen: HashSet<&Path> = HashSet::new();
        let distinct: Vec<&Arc<FileItem>> = ids
            .iter()
            .filter_map(|&id| self.graph[id].action.dependency_list_file.as_ref())
            .filter(|item| seen.insert(item.path()))
            .collect();

        let failure = distinct
            .par_iter()
            .map(|list_file| cache.get_dependencies(list_file, &self.context.files).map(|_| ()))
            .find_map_any(|result| match result {
                Err(err @ CacheError::UnsupportedFormat { .. }) => Some(err),
                _ => None,
            });

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Evaluate the given actions in parallel and return the outdated ones
    /// in graph order.
    ///
    /// Only the listed actions (and, through recursion, their prerequisite
    /// producers) are touched. That scoping matters for correctness, not
    /// just cost: the history check records the current command line as a
    /// side effect, and recording it for an action that is never executed
    /// would consume its change signal and leave it silently stale on a
    /// later build. Callers pass a prerequisite-closed set, so recursion
    /// stays inside it.
    pub fn gather_outdated_actions(&self, ids: &[ActionId]) -> GraphResult<Vec<ActionId>> {
        self.prefetch_dependency_lists(ids)?;

        ids.par_iter().for_each(|&id| {
            self.is_outdated(id);
        });

        let mut outdated: Vec<ActionId> =
            ids.iter().copied().filter(|&id| self.is_outdated(id)).collect();
        outdated.sort();
        Ok(outdated)
    }

    /// Evaluate the whole graph in parallel and return the outdated actions
    /// in graph order.
    pub fn gather_all_outdated_actions(&self) -> GraphResult<Vec<ActionId>> {
        let all: Vec<ActionId> = (0..self.graph.len()).map(ActionId).collect();
        self.gather_outdated_actions(&all)
    }
}
