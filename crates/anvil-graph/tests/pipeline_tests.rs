//! End-to-end planning and execution flow
//!
//! Simulates the executor with an in-process double that writes the declared
//! outputs, which is all the engine's contract requires of it.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anvil_cache::ActionHistory;
use anvil_core::{export_actions, import_actions, Action, ActionType, FileItemRegistry};
use anvil_graph::{
    execute_plan, plan_actions, ActionExecutor, ActionGraph, ActionId, BuildContext,
    ExecutionError, GraphError, OutdatedPolicy,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Executor double: "runs" each action by writing its produced items.
struct WritingExecutor {
    /// Paths the executor should pretend it failed to produce.
    skip: Vec<PathBuf>,
}

impl WritingExecutor {
    fn new() -> Self {
        Self { skip: Vec::new() }
    }
}

impl ActionExecutor for WritingExecutor {
    fn name(&self) -> &str {
        "writing-test-executor"
    }

    fn execute(&self, graph: &ActionGraph, ordered: &[ActionId]) -> Result<(), ExecutionError> {
        for &id in ordered {
            for item in &graph[id].action.produced_items {
                if self.skip.contains(&item.path().to_path_buf()) {
                    continue;
                }
                fs::write(item.path(), "output").map_err(|e| {
                    ExecutionError::new(graph[id].action.to_string(), e.to_string())
                })?;
            }
        }
        Ok(())
    }
}

/// Executor double that always fails.
struct FailingExecutor;

impl ActionExecutor for FailingExecutor {
    fn name(&self) -> &str {
        "failing-test-executor"
    }

    fn execute(&self, graph: &ActionGraph, ordered: &[ActionId]) -> Result<(), ExecutionError> {
        let first = ordered[0];
        Err(ExecutionError::new(
            graph[first].action.to_string(),
            "simulated failure",
        ))
    }
}

struct Project {
    dir: TempDir,
    context: BuildContext,
    history: ActionHistory,
    src: PathBuf,
    obj: PathBuf,
    exe: PathBuf,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let history = ActionHistory::mount(dir.path());

        let src = dir.path().join("main.c");
        fs::write(&src, "int main() { return 0; }").unwrap();
        fs::File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(100))
            .unwrap();

        Self {
            obj: dir.path().join("out/main.o"),
            exe: dir.path().join("out/app"),
            dir,
            context: BuildContext::new(),
            history,
            src,
        }
    }

    fn actions(&self) -> Vec<Arc<Action>> {
        let registry = &self.context.files;
        let compile = Action::new(ActionType::Compile)
            .with_command("/", "/usr/bin/cc", format!("-c {}", self.src.display()))
            .with_prerequisites(vec![registry.item(&self.src)])
            .with_produced(vec![registry.item(&self.obj)])
            .with_status_description("main.c");
        let link = Action::new(ActionType::Link)
            .with_command("/", "/usr/bin/ld", "-o app main.o")
            .with_prerequisites(vec![registry.item(&self.obj)])
            .with_produced(vec![registry.item(&self.exe)])
            .with_status_description("app");
        vec![Arc::new(compile), Arc::new(link)]
    }

    fn plan(&self, graph: &ActionGraph) -> Vec<ActionId> {
        plan_actions(
            graph,
            &self.context,
            &self.history,
            None,
            OutdatedPolicy::default(),
            &[self.context.files.item(&self.exe)],
        )
        .unwrap()
    }
}

#[test]
fn clean_build_runs_everything_then_nothing() {
    let project = Project::new();
    let graph = ActionGraph::link(project.actions()).unwrap();

    let plan = project.plan(&graph);
    assert_eq!(plan.len(), 2);

    // Compile unblocks the link, so it is dispatched first.
    let compile_id = graph.producer_of_path(&project.obj).unwrap();
    let link_id = graph.producer_of_path(&project.exe).unwrap();
    assert_eq!(plan, vec![compile_id, link_id]);

    // Output directory was created by the planner.
    assert!(project.dir.path().join("out").is_dir());

    execute_plan(&graph, &plan, &WritingExecutor::new()).unwrap();
    assert!(project.obj.exists());
    assert!(project.exe.exists());

    // Incremental rebuild: nothing to do.
    let replan = project.plan(&graph);
    assert!(replan.is_empty());
}

#[test]
fn planning_only_covers_the_requested_closure() {
    let project = Project::new();
    let registry = &project.context.files;

    let other_src = project.dir.path().join("other.c");
    fs::write(&other_src, "void other() {}").unwrap();
    let other_obj = project.dir.path().join("out/other.o");

    let mut actions = project.actions();
    actions.push(Arc::new(
        Action::new(ActionType::Compile)
            .with_command("/", "/usr/bin/cc", format!("-c {}", other_src.display()))
            .with_prerequisites(vec![registry.item(&other_src)])
            .with_produced(vec![registry.item(&other_obj)]),
    ));
    let graph = ActionGraph::link(actions).unwrap();

    // Everything is outdated, but only the app's closure is planned.
    let plan = project.plan(&graph);
    assert_eq!(plan.len(), 2);
    let other_id = graph.producer_of_path(&other_obj).unwrap();
    assert!(!plan.contains(&other_id));
}

#[test]
fn planning_one_target_keeps_other_targets_pending_changes() {
    let dir = TempDir::new().unwrap();
    let history = ActionHistory::mount(dir.path());
    let context = BuildContext::new();

    let write = |name: &str, age_secs: u64| -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, "contents").unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
        path
    };

    let x_src = write("x.c", 100);
    let x_obj = write("x.o", 50);
    let y_src = write("y.c", 100);
    let y_obj = write("y.o", 50);

    let x = Arc::new(
        Action::new(ActionType::Compile)
            .with_command("/", "/usr/bin/cc", format!("-O2 -c {}", x_src.display()))
            .with_prerequisites(vec![context.files.item(&x_src)])
            .with_produced(vec![context.files.item(&x_obj)]),
    );
    let y = Arc::new(
        Action::new(ActionType::Compile)
            .with_command("/", "/usr/bin/cc", format!("-c {}", y_src.display()))
            .with_prerequisites(vec![context.files.item(&y_src)])
            .with_produced(vec![context.files.item(&y_obj)]),
    );

    // x was last built with different flags; y is fully current.
    history.update_producing_command_line(&context.files.item(&x_obj), "cc -c x.c");
    history.update_producing_command_line(&context.files.item(&y_obj), &y.full_command_line());

    let graph = ActionGraph::link(vec![x, y]).unwrap();
    let x_id = graph.producer_of_path(&x_obj).unwrap();

    let plan_for = |desired: &PathBuf| {
        plan_actions(
            &graph,
            &context,
            &history,
            None,
            OutdatedPolicy::default(),
            &[context.files.item(desired)],
        )
        .unwrap()
    };

    // Building y alone has nothing to do, and must not consume x's
    // recorded command-line change along the way.
    assert!(plan_for(&y_obj).is_empty());
    assert_eq!(plan_for(&x_obj), vec![x_id]);
}

#[test]
fn planner_deletes_stale_outputs_before_execution() {
    let project = Project::new();
    let graph = ActionGraph::link(project.actions()).unwrap();

    fs::create_dir_all(project.obj.parent().unwrap()).unwrap();
    fs::write(&project.obj, "stale").unwrap();
    // Leave the object older than the source so the compile is outdated.
    fs::File::options()
        .write(true)
        .open(&project.obj)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(200))
        .unwrap();

    project.plan(&graph);
    assert!(!project.obj.exists());
}

#[test]
fn execution_failure_is_propagated() {
    let project = Project::new();
    let graph = ActionGraph::link(project.actions()).unwrap();
    let plan = project.plan(&graph);

    let err = execute_plan(&graph, &plan, &FailingExecutor).unwrap_err();
    match err {
        GraphError::Execution(inner) => {
            assert!(inner.to_string().contains("simulated failure"));
        }
        other => panic!("expected execution error, got {other}"),
    }
}

#[test]
fn missing_link_output_after_success_is_fatal() {
    let project = Project::new();
    let graph = ActionGraph::link(project.actions()).unwrap();
    let plan = project.plan(&graph);

    let executor = WritingExecutor {
        skip: vec![project.exe.clone()],
    };
    let err = execute_plan(&graph, &plan, &executor).unwrap_err();
    match err {
        GraphError::MissingProducedItem { path, .. } => assert_eq!(path, project.exe),
        other => panic!("expected missing produced item, got {other}"),
    }
}

#[test]
fn exported_graph_relinks_equivalently() {
    let project = Project::new();
    let actions = project.actions();
    let json = export_actions(&actions, &BTreeMap::new()).unwrap();

    let fresh = FileItemRegistry::new();
    let imported = import_actions(&json, &fresh).unwrap();

    let original = ActionGraph::link(actions).unwrap();
    let reimported = ActionGraph::link(imported).unwrap();

    assert_eq!(original.len(), reimported.len());
    for ((_, a), (_, b)) in original.iter().zip(reimported.iter()) {
        assert_eq!(a.action.action_type, b.action.action_type);
        assert_eq!(a.prerequisites, b.prerequisites);
        let a_paths: Vec<_> = a.action.produced_items.iter().map(|i| i.path()).collect();
        let b_paths: Vec<_> = b.action.produced_items.iter().map(|i| i.path()).collect();
        assert_eq!(a_paths, b_paths);
    }
}
