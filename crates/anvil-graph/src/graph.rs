//! Action graph linking, cycle detection, and scheduling order
//!
//! A flat action list becomes a DAG by resolving every prerequisite file
//! against the map of produced files. Linking is a correctness gate: a graph
//! with a cycle or with two different actions claiming the same output is
//! rejected with a full diagnostic, never silently patched up.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Index;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anvil_core::{Action, FileItem};

use crate::error::{CyclicAction, GraphError, GraphResult};

/// Stable handle to one linked action within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub(crate) usize);

impl ActionId {
    /// Position of the action in the graph's action list.
    pub fn index(self) -> usize {
        self.0
    }
}

/// An action plus its resolved graph edges.
///
/// Created once per build invocation by `ActionGraph::link`; not persisted.
#[derive(Debug)]
pub struct LinkedAction {
    /// The underlying immutable action.
    pub action: Arc<Action>,
    /// Actions producing this action's prerequisite items.
    pub prerequisites: Vec<ActionId>,
    /// Names of the targets that pulled this action in (merged builds only).
    pub group_names: Vec<String>,
}

/// The linked build graph: actions, their edges, and the produced-item map.
#[derive(Debug)]
pub struct ActionGraph {
    actions: Vec<LinkedAction>,
    producers: HashMap<PathBuf, ActionId>,
}

impl ActionGraph {
    /// Link a single flat action list into a graph.
    pub fn link(actions: Vec<Arc<Action>>) -> GraphResult<Self> {
        Self::link_targets(vec![(String::new(), actions)])
    }

    /// Link the action lists of several targets into one merged graph.
    ///
    /// Actions shared between targets are deduplicated by their first
    /// produced item after checking field-by-field equivalence; each linked
    /// action records which targets pulled it in.
    pub fn link_targets(targets: Vec<(String, Vec<Arc<Action>>)>) -> GraphResult<Self> {
        let mut actions: Vec<LinkedAction> = Vec::new();
        let mut by_first_output: HashMap<PathBuf, ActionId> = HashMap::new();

        for (group_name, target_actions) in targets {
            for action in target_actions {
                let first_output = action
                    .first_produced_item()
                    .ok_or_else(|| GraphError::NoProducedItems {
                        command: action.full_command_line(),
                    })?
                    .path()
                    .to_path_buf();

                let id = match by_first_output.get(&first_output) {
                    Some(&existing) => {
                        check_for_conflicts(&actions[existing.0].action, &action)?;
                        existing
                    }
                    None => {
                        let id = ActionId(actions.len());
                        actions.push(LinkedAction {
                            action,
                            prerequisites: Vec::new(),
                            group_names: Vec::new(),
                        });
                        by_first_output.insert(first_output, id);
                        id
                    }
                };

                let groups = &mut actions[id.0].group_names;
                if !group_name.is_empty() && !groups.contains(&group_name) {
                    groups.push(group_name.clone());
                }
            }
        }

        // Every produced item maps to exactly one producer; a second claimant
        // with a different first output is still a conflict.
        let mut producers: HashMap<PathBuf, ActionId> = HashMap::new();
        for (index, linked) in actions.iter().enumerate() {
            for item in &linked.action.produced_items {
                let path = item.path().to_path_buf();
                if let Some(&other) = producers.get(&path) {
                    if other.0 != index {
                        return Err(GraphError::Conflict {
                            output: path,
                            field: "ProducedItems",
                            first: actions[other.0].action.full_command_line(),
                            second: linked.action.full_command_line(),
                        });
                    }
                } else {
                    producers.insert(path, ActionId(index));
                }
            }
        }

        // Resolve prerequisite items to their producing actions.
        for index in 0..actions.len() {
            let mut edges = BTreeSet::new();
            for item in &actions[index].action.prerequisite_items {
                if let Some(&producer) = producers.get(item.path()) {
                    if producer.0 != index {
                        edges.insert(producer);
                    }
                }
            }
            actions[index].prerequisites = edges.into_iter().collect();
        }

        let graph = Self { actions, producers };
        graph.detect_cycles()?;

        log::debug!(
            "Linked action graph: {} actions, {} produced items",
            graph.actions.len(),
            graph.producers.len()
        );
        Ok(graph)
    }

    /// Fail if any subset of actions forms a dependency cycle.
    ///
    /// Grows the set of known-acyclic actions: an action joins once all its
    /// prerequisites are either unproduced or already in the set. Whatever
    /// never joins is part of a cycle and reported in full.
    fn detect_cycles(&self) -> GraphResult<()> {
        let mut acyclic = vec![false; self.actions.len()];

        loop {
            let mut grew = false;
            for index in 0..self.actions.len() {
                if acyclic[index] {
                    continue;
                }
                if self.actions[index]
                    .prerequisites
                    .iter()
                    .all(|dep| acyclic[dep.0])
                {
                    acyclic[index] = true;
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        if acyclic.iter().all(|&ok| ok) {
            return Ok(());
        }

        let residual: Vec<CyclicAction> = self
            .actions
            .iter()
            .enumerate()
            .filter(|(index, _)| !acyclic[*index])
            .map(|(_, linked)| CyclicAction {
                command: linked.action.full_command_line(),
                prerequisites: linked
                    .action
                    .prerequisite_items
                    .iter()
                    .map(|i| i.path().to_path_buf())
                    .collect(),
                produced: linked
                    .action
                    .produced_items
                    .iter()
                    .map(|i| i.path().to_path_buf())
                    .collect(),
                cyclic_dependencies: linked
                    .prerequisites
                    .iter()
                    .filter(|dep| !acyclic[dep.0])
                    .map(|dep| self.actions[dep.0].action.full_command_line())
                    .collect(),
            })
            .collect();

        Err(GraphError::Cycle { actions: residual })
    }

    /// The action producing the given file, if any.
    pub fn producer_of(&self, item: &FileItem) -> Option<ActionId> {
        self.producers.get(item.path()).copied()
    }

    /// The action producing the given path, if any.
    pub fn producer_of_path(&self, path: &Path) -> Option<ActionId> {
        self.producers.get(path).copied()
    }

    /// Minimal set of actions that (transitively) produce the desired files.
    ///
    /// Seeds with every action whose produced items intersect the desired
    /// set, then takes the set-union closure over prerequisite edges; shared
    /// ancestors are visited once.
    pub fn gather_prerequisite_actions(&self, desired: &[Arc<FileItem>]) -> Vec<ActionId> {
        let desired_paths: HashSet<&Path> = desired.iter().map(|i| i.path()).collect();

        let mut visited = vec![false; self.actions.len()];
        let mut stack: Vec<ActionId> = self
            .actions
            .iter()
            .enumerate()
            .filter(|(_, linked)| {
                linked
                    .action
                    .produced_items
                    .iter()
                    .any(|item| desired_paths.contains(item.path()))
            })
            .map(|(index, _)| ActionId(index))
            .collect();

        while let Some(id) = stack.pop() {
            if visited[id.0] {
                continue;
            }
            visited[id.0] = true;
            stack.extend(&self.actions[id.0].prerequisites);
        }

        (0..self.actions.len())
            .filter(|&index| visited[index])
            .map(ActionId)
            .collect()
    }

    /// How many other actions (transitively) depend on each action.
    ///
    /// Used as the scheduling priority: an action unblocking a wide part of
    /// the graph should be dispatched first.
    pub fn total_dependent_counts(&self) -> Vec<u32> {
        let mut dependents: Vec<Vec<ActionId>> = vec![Vec::new(); self.actions.len()];
        for (index, linked) in self.actions.iter().enumerate() {
            for dep in &linked.prerequisites {
                dependents[dep.0].push(ActionId(index));
            }
        }

        (0..self.actions.len())
            .map(|start| {
                let mut visited = vec![false; self.actions.len()];
                let mut stack = dependents[start].clone();
                let mut count = 0u32;
                while let Some(id) = stack.pop() {
                    if visited[id.0] {
                        continue;
                    }
                    visited[id.0] = true;
                    count += 1;
                    stack.extend(&dependents[id.0]);
                }
                count
            })
            .collect()
    }

    /// Order actions for execution: descending transitive dependent count,
    /// tie-broken by descending prerequisite-item count, then by graph index
    /// so the order is deterministic.
    pub fn sort_action_list(&self, ids: &mut [ActionId]) {
        let counts = self.total_dependent_counts();
        ids.sort_by(|a, b| {
            counts[b.0]
                .cmp(&counts[a.0])
                .then_with(|| {
                    self.actions[b.0]
                        .action
                        .prerequisite_items
                        .len()
                        .cmp(&self.actions[a.0].action.prerequisite_items.len())
                })
                .then_with(|| a.0.cmp(&b.0))
        });
    }

    /// All linked actions with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (ActionId, &LinkedAction)> {
        self.actions
            .iter()
            .enumerate()
            .map(|(index, linked)| (ActionId(index), linked))
    }

    /// Number of linked actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the graph holds no actions.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Index<ActionId> for ActionGraph {
    type Output = LinkedAction;

    fn index(&self, id: ActionId) -> &LinkedAction {
        &self.actions[id.0]
    }
}

/// Verify that two actions claiming the same first output are equivalent.
///
/// Checked fields: action type, prerequisite items (order-sensitive), delete
/// items, dependency list file, working directory, command path, command
/// arguments. The first mismatch is reported with both values; merging never
/// silently picks one side.
pub fn check_for_conflicts(first: &Action, second: &Action) -> GraphResult<()> {
    let output = first
        .first_produced_item()
        .map(|i| i.path().to_path_buf())
        .unwrap_or_default();

    let conflict = |field: &'static str, a: String, b: String| {
        Err(GraphError::Conflict {
            output: output.clone(),
            field,
            first: a,
            second: b,
        })
    };

    if first.action_type != second.action_type {
        return conflict(
            "Type",
            first.action_type.to_string(),
            second.action_type.to_string(),
        );
    }
    if !same_items(&first.prerequisite_items, &second.prerequisite_items) {
        return conflict(
            "PrerequisiteItems",
            join_paths(&first.prerequisite_items),
            join_paths(&second.prerequisite_items),
        );
    }
    if !same_items(&first.delete_items, &second.delete_items) {
        return conflict(
            "DeleteItems",
            join_paths(&first.delete_items),
            join_paths(&second.delete_items),
        );
    }
    if option_path(&first.dependency_list_file) != option_path(&second.dependency_list_file) {
        return conflict(
            "DependencyListFile",
            option_path(&first.dependency_list_file).unwrap_or_default(),
            option_path(&second.dependency_list_file).unwrap_or_default(),
        );
    }
    if first.working_directory != second.working_directory {
        return conflict(
            "WorkingDirectory",
            first.working_directory.display().to_string(),
            second.working_directory.display().to_string(),
        );
    }
    if first.command_path != second.command_path {
        return conflict(
            "CommandPath",
            first.command_path.display().to_string(),
            second.command_path.display().to_string(),
        );
    }
    if first.command_arguments != second.command_arguments {
        return conflict(
            "CommandArguments",
            first.command_arguments.clone(),
            second.command_arguments.clone(),
        );
    }

    Ok(())
}

fn same_items(a: &[Arc<FileItem>], b: &[Arc<FileItem>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.path() == y.path())
}

fn join_paths(items: &[Arc<FileItem>]) -> String {
    items
        .iter()
        .map(|i| i.path().display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn option_path(item: &Option<Arc<FileItem>>) -> Option<String> {
    item.as_ref().map(|i| i.path().display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_core::{ActionType, FileItemRegistry};

    fn compile(
        registry: &FileItemRegistry,
        source: &str,
        object: &str,
        args: &str,
    ) -> Arc<Action> {
        Arc::new(
            Action::new(ActionType::Compile)
                .with_command("/src", "/usr/bin/cc", args)
                .with_prerequisites(vec![registry.item(source)])
                .with_produced(vec![registry.item(object)]),
        )
    }

    fn link_action(registry: &FileItemRegistry, objects: &[&str], binary: &str) -> Arc<Action> {
        Arc::new(
            Action::new(ActionType::Link)
                .with_command("/out", "/usr/bin/ld", format!("-o {binary}"))
                .with_prerequisites(objects.iter().map(|o| registry.item(o)).collect())
                .with_produced(vec![registry.item(binary)]),
        )
    }

    #[test]
    fn linking_resolves_edges() {
        let registry = FileItemRegistry::new();
        let a = compile(&registry, "/src/a.c", "/out/a.o", "-c a.c");
        let b = compile(&registry, "/src/b.c", "/out/b.o", "-c b.c");
        let l = link_action(&registry, &["/out/a.o", "/out/b.o"], "/out/app");

        let graph = ActionGraph::link(vec![a, b, l]).unwrap();
        assert_eq!(graph.len(), 3);

        let link_id = graph.producer_of(&registry.item("/out/app")).unwrap();
        assert_eq!(graph[link_id].prerequisites.len(), 2);

        let a_id = graph.producer_of(&registry.item("/out/a.o")).unwrap();
        assert!(graph[a_id].prerequisites.is_empty());
    }

    #[test]
    fn external_inputs_produce_no_edges() {
        let registry = FileItemRegistry::new();
        let a = compile(&registry, "/src/a.c", "/out/a.o", "-c a.c");
        let graph = ActionGraph::link(vec![a]).unwrap();
        assert!(graph[ActionId(0)].prerequisites.is_empty());
        assert!(graph.producer_of(&registry.item("/src/a.c")).is_none());
    }

    #[test]
    fn cycle_is_rejected_with_full_diagnostic() {
        let registry = FileItemRegistry::new();
        // a needs b's output, b needs a's output
        let a = Arc::new(
            Action::new(ActionType::Compile)
                .with_command("/", "/usr/bin/gen-a", "")
                .with_prerequisites(vec![registry.item("/out/b.h")])
                .with_produced(vec![registry.item("/out/a.h")]),
        );
        let b = Arc::new(
            Action::new(ActionType::Compile)
                .with_command("/", "/usr/bin/gen-b", "")
                .with_prerequisites(vec![registry.item("/out/a.h")])
                .with_produced(vec![registry.item("/out/b.h")]),
        );
        let ok = compile(&registry, "/src/c.c", "/out/c.o", "-c c.c");

        let err = ActionGraph::link(vec![a, b, ok]).unwrap_err();
        match &err {
            GraphError::Cycle { actions } => {
                // Only the residual set is reported, and each member names
                // its cyclic peers.
                assert_eq!(actions.len(), 2);
                assert!(actions.iter().all(|a| !a.cyclic_dependencies.is_empty()));
            }
            other => panic!("expected cycle error, got {other}"),
        }

        let message = err.to_string();
        assert!(message.contains("/usr/bin/gen-a"));
        assert!(message.contains("prerequisite: /out/b.h"));
        assert!(message.contains("produces: /out/a.h"));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let registry = FileItemRegistry::new();
        let a = Arc::new(
            Action::new(ActionType::PostBuildStep)
                .with_command("/", "/bin/touch", "x")
                .with_prerequisites(vec![registry.item("/out/x")])
                .with_produced(vec![registry.item("/out/x")]),
        );
        // The edge to itself is dropped during linking, so this links fine
        // and simply has no prerequisites.
        let graph = ActionGraph::link(vec![a]).unwrap();
        assert!(graph[ActionId(0)].prerequisites.is_empty());
    }

    #[test]
    fn duplicate_producer_with_different_command_conflicts() {
        let registry = FileItemRegistry::new();
        let a = compile(&registry, "/src/a.c", "/out/a.o", "-c a.c");
        let b = compile(&registry, "/src/a.c", "/out/a.o", "-c a.c -O2");

        let err = ActionGraph::link(vec![a, b]).unwrap_err();
        match err {
            GraphError::Conflict { field, first, second, .. } => {
                assert_eq!(field, "CommandArguments");
                assert_eq!(first, "-c a.c");
                assert_eq!(second, "-c a.c -O2");
            }
            other => panic!("expected conflict, got {other}"),
        }
    }

    #[test]
    fn identical_duplicate_is_deduplicated() {
        let registry = FileItemRegistry::new();
        let a = compile(&registry, "/src/a.c", "/out/a.o", "-c a.c");
        let graph = ActionGraph::link(vec![Arc::clone(&a), a]).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn merged_targets_record_group_names() {
        let registry = FileItemRegistry::new();
        let shared = compile(&registry, "/src/shared.c", "/out/shared.o", "-c shared.c");
        let game = link_action(&registry, &["/out/shared.o"], "/out/game");
        let editor = link_action(&registry, &["/out/shared.o"], "/out/editor");

        let graph = ActionGraph::link_targets(vec![
            ("Game".to_string(), vec![Arc::clone(&shared), game]),
            ("Editor".to_string(), vec![shared, editor]),
        ])
        .unwrap();

        assert_eq!(graph.len(), 3);
        let shared_id = graph.producer_of(&registry.item("/out/shared.o")).unwrap();
        assert_eq!(graph[shared_id].group_names, vec!["Game", "Editor"]);

        let game_id = graph.producer_of(&registry.item("/out/game")).unwrap();
        assert_eq!(graph[game_id].group_names, vec!["Game"]);
    }

    #[test]
    fn secondary_output_conflict_is_detected() {
        let registry = FileItemRegistry::new();
        let a = Arc::new(
            Action::new(ActionType::Link)
                .with_command("/", "/usr/bin/ld", "-o liba")
                .with_produced(vec![registry.item("/out/liba.so"), registry.item("/out/liba.lib")]),
        );
        let b = Arc::new(
            Action::new(ActionType::Link)
                .with_command("/", "/usr/bin/ld", "-o libb")
                .with_produced(vec![registry.item("/out/libb.so"), registry.item("/out/liba.lib")]),
        );

        let err = ActionGraph::link(vec![a, b]).unwrap_err();
        assert!(matches!(err, GraphError::Conflict { field: "ProducedItems", .. }));
    }

    #[test]
    fn action_without_outputs_is_rejected() {
        let a = Arc::new(Action::new(ActionType::PostBuildStep).with_command(
            "/",
            "/bin/true",
            "",
        ));
        let err = ActionGraph::link(vec![a]).unwrap_err();
        assert!(matches!(err, GraphError::NoProducedItems { .. }));
    }

    #[test]
    fn closure_contains_exactly_the_reachable_actions() {
        let registry = FileItemRegistry::new();
        let a = compile(&registry, "/src/a.c", "/out/a.o", "-c a.c");
        let b = compile(&registry, "/src/b.c", "/out/b.o", "-c b.c");
        let app = link_action(&registry, &["/out/a.o"], "/out/app");
        let other = link_action(&registry, &["/out/b.o"], "/out/other");

        let graph = ActionGraph::link(vec![a, b, app, other]).unwrap();
        let closure = graph.gather_prerequisite_actions(&[registry.item("/out/app")]);

        let a_id = graph.producer_of(&registry.item("/out/a.o")).unwrap();
        let app_id = graph.producer_of(&registry.item("/out/app")).unwrap();
        assert_eq!(closure, {
            let mut expected = vec![a_id, app_id];
            expected.sort();
            expected
        });
    }

    #[test]
    fn closure_visits_shared_ancestors_once() {
        let registry = FileItemRegistry::new();
        let common = compile(&registry, "/src/common.c", "/out/common.o", "-c common.c");
        let a = link_action(&registry, &["/out/common.o"], "/out/a");
        let b = link_action(&registry, &["/out/common.o", "/out/a"], "/out/b");

        let graph = ActionGraph::link(vec![common, a, b]).unwrap();
        let closure = graph.gather_prerequisite_actions(&[registry.item("/out/b")]);
        assert_eq!(closure.len(), 3);
    }

    #[test]
    fn sort_prioritizes_wide_unblockers() {
        let registry = FileItemRegistry::new();
        // header generator feeds both compiles; link depends on both objects
        let gen = Arc::new(
            Action::new(ActionType::BuildProject)
                .with_command("/", "/usr/bin/gen", "")
                .with_prerequisites(vec![registry.item("/src/schema")])
                .with_produced(vec![registry.item("/out/gen.h")]),
        );
        let a = Arc::new(
            Action::new(ActionType::Compile)
                .with_command("/", "/usr/bin/cc", "-c a.c")
                .with_prerequisites(vec![registry.item("/src/a.c"), registry.item("/out/gen.h")])
                .with_produced(vec![registry.item("/out/a.o")]),
        );
        let b = Arc::new(
            Action::new(ActionType::Compile)
                .with_command("/", "/usr/bin/cc", "-c b.c")
                .with_prerequisites(vec![registry.item("/src/b.c"), registry.item("/out/gen.h")])
                .with_produced(vec![registry.item("/out/b.o")]),
        );
        let l = link_action(&registry, &["/out/a.o", "/out/b.o"], "/out/app");

        let graph = ActionGraph::link(vec![gen, a, b, l]).unwrap();
        let counts = graph.total_dependent_counts();

        let gen_id = graph.producer_of(&registry.item("/out/gen.h")).unwrap();
        let link_id = graph.producer_of(&registry.item("/out/app")).unwrap();
        assert_eq!(counts[gen_id.0], 3);
        assert_eq!(counts[link_id.0], 0);

        let mut order: Vec<ActionId> = graph.iter().map(|(id, _)| id).collect();
        graph.sort_action_list(&mut order);
        assert_eq!(order.first(), Some(&gen_id));
        assert_eq!(order.last(), Some(&link_id));
    }

    #[test]
    fn sort_breaks_ties_by_prerequisite_count_then_index() {
        let registry = FileItemRegistry::new();
        let one = compile(&registry, "/src/one.c", "/out/one.o", "-c one.c");
        let many = Arc::new(
            Action::new(ActionType::Compile)
                .with_command("/", "/usr/bin/cc", "-c many.c")
                .with_prerequisites(vec![
                    registry.item("/src/many.c"),
                    registry.item("/inc/a.h"),
                    registry.item("/inc/b.h"),
                ])
                .with_produced(vec![registry.item("/out/many.o")]),
        );

        let graph = ActionGraph::link(vec![one, many]).unwrap();
        let mut order: Vec<ActionId> = graph.iter().map(|(id, _)| id).collect();
        graph.sort_action_list(&mut order);

        // Equal dependent counts (both zero); more prerequisites first.
        let many_id = graph.producer_of(&registry.item("/out/many.o")).unwrap();
        assert_eq!(order.first(), Some(&many_id));

        // Sorting twice yields the same order.
        let frozen = order.clone();
        graph.sort_action_list(&mut order);
        assert_eq!(order, frozen);
    }
}
