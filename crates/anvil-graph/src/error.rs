/// Graph engine error types
///
/// Graph-structural errors (cycles, conflicting producers) abort the build:
/// they mean the build description itself is invalid. Cache-layer problems
/// never surface here; they degrade to "assume outdated" inside the
/// staleness checker.
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

use crate::executor::ExecutionError;

pub type GraphResult<T> = Result<T, GraphError>;

/// Diagnostic payload for one action caught in a dependency cycle.
#[derive(Debug, Clone)]
pub struct CyclicAction {
    /// Full command line of the action.
    pub command: String,
    /// Declared input paths.
    pub prerequisites: Vec<PathBuf>,
    /// Declared output paths.
    pub produced: Vec<PathBuf>,
    /// Commands of the cyclic peers this action depends on.
    pub cyclic_dependencies: Vec<String>,
}

fn render_cycle(actions: &[CyclicAction]) -> String {
    let mut out = String::from("Action graph contains a cycle:");
    for action in actions {
        let _ = write!(out, "\n  {}", action.command);
        for path in &action.prerequisites {
            let _ = write!(out, "\n    prerequisite: {}", path.display());
        }
        for path in &action.produced {
            let _ = write!(out, "\n    produces: {}", path.display());
        }
        for peer in &action.cyclic_dependencies {
            let _ = write!(out, "\n    depends on cyclic action: {peer}");
        }
    }
    out
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("{}", render_cycle(.actions))]
    Cycle { actions: Vec<CyclicAction> },

    #[error(
        "Two actions produce {} but differ in {field}:\n  first:  {first}\n  second: {second}",
        .output.display()
    )]
    Conflict {
        output: PathBuf,
        field: &'static str,
        first: String,
        second: String,
    },

    #[error("Action has no produced items: {command}")]
    NoProducedItems { command: String },

    #[error(
        "Declared output {} was not produced by: {command}",
        .path.display()
    )]
    MissingProducedItem { path: PathBuf, command: String },

    #[error(transparent)]
    Cache(#[from] anvil_cache::CacheError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("I/O error at {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl GraphError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error,
        }
    }
}
