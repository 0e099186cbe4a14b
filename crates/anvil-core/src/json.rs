//! JSON interchange for action lists
//!
//! An exported document carries the flat action list plus the environment
//! variable overrides the actions were created under, so another process (or
//! a distributed build backend) can reconstruct an equivalent graph. File
//! identities are serialized as paths and re-interned on import against a
//! fresh registry; numeric ids never cross the process boundary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionType};
use crate::error::{CoreError, CoreResult};
use crate::file_item::{FileItem, FileItemRegistry};

/// Wire form of a single action.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActionJson {
    #[serde(rename = "Type")]
    action_type: ActionType,
    #[serde(rename = "WorkingDirectory")]
    working_directory: PathBuf,
    #[serde(rename = "CommandPath")]
    command_path: PathBuf,
    #[serde(rename = "CommandArguments")]
    command_arguments: String,
    #[serde(rename = "CommandDescription")]
    command_description: String,
    #[serde(rename = "StatusDescription")]
    status_description: String,
    #[serde(rename = "bCanExecuteRemotely")]
    can_execute_remotely: bool,
    #[serde(rename = "bCanExecuteRemotelyWithSNDBS")]
    can_execute_remotely_with_sndbs: bool,
    #[serde(rename = "bIsGCCCompiler")]
    is_gcc_compiler: bool,
    #[serde(rename = "bShouldOutputStatusDescription")]
    should_output_status_description: bool,
    #[serde(rename = "bProducesImportLibrary")]
    produces_import_library: bool,
    #[serde(rename = "PrerequisiteItems")]
    prerequisite_items: Vec<PathBuf>,
    #[serde(rename = "ProducedItems")]
    produced_items: Vec<PathBuf>,
    #[serde(rename = "DeleteItems")]
    delete_items: Vec<PathBuf>,
    #[serde(rename = "DependencyListFile", skip_serializing_if = "Option::is_none")]
    dependency_list_file: Option<PathBuf>,
}

/// Document root: environment overrides plus the action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActionDocument {
    #[serde(rename = "Environment", default)]
    environment: BTreeMap<String, String>,
    #[serde(rename = "Actions")]
    actions: Vec<ActionJson>,
}

fn paths_of(items: &[Arc<FileItem>]) -> Vec<PathBuf> {
    items.iter().map(|i| i.path().to_path_buf()).collect()
}

fn items_of(paths: &[PathBuf], registry: &FileItemRegistry) -> Vec<Arc<FileItem>> {
    paths.iter().map(|p| registry.item(p)).collect()
}

impl ActionJson {
    fn from_action(action: &Action) -> Self {
        Self {
            action_type: action.action_type,
            working_directory: action.working_directory.clone(),
            command_path: action.command_path.clone(),
            command_arguments: action.command_arguments.clone(),
            command_description: action.command_description.clone(),
            status_description: action.status_description.clone(),
            can_execute_remotely: action.can_execute_remotely,
            can_execute_remotely_with_sndbs: action.can_execute_remotely_with_sndbs,
            is_gcc_compiler: action.is_gcc_compiler,
            should_output_status_description: action.should_output_status_description,
            produces_import_library: action.produces_import_library,
            prerequisite_items: paths_of(&action.prerequisite_items),
            produced_items: paths_of(&action.produced_items),
            delete_items: paths_of(&action.delete_items),
            dependency_list_file: action
                .dependency_list_file
                .as_ref()
                .map(|i| i.path().to_path_buf()),
        }
    }

    fn into_action(self, registry: &FileItemRegistry) -> Action {
        Action {
            action_type: self.action_type,
            prerequisite_items: items_of(&self.prerequisite_items, registry),
            produced_items: items_of(&self.produced_items, registry),
            delete_items: items_of(&self.delete_items, registry),
            dependency_list_file: self.dependency_list_file.map(|p| registry.item(p)),
            compiled_module_interface_file: None,
            working_directory: self.working_directory,
            command_path: self.command_path,
            command_arguments: self.command_arguments,
            command_description: self.command_description,
            status_description: self.status_description,
            can_execute_remotely: self.can_execute_remotely,
            can_execute_remotely_with_sndbs: self.can_execute_remotely_with_sndbs,
            is_gcc_compiler: self.is_gcc_compiler,
            should_output_status_description: self.should_output_status_description,
            produces_import_library: self.produces_import_library,
        }
    }
}

/// Serialize actions and environment overrides to a JSON document.
pub fn export_actions(
    actions: &[Arc<Action>],
    environment: &BTreeMap<String, String>,
) -> CoreResult<String> {
    let document = ActionDocument {
        environment: environment.clone(),
        actions: actions.iter().map(|a| ActionJson::from_action(a)).collect(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Parse a JSON document, applying its environment overrides to the current
/// process before reconstructing the actions against the given registry.
pub fn import_actions(json: &str, registry: &FileItemRegistry) -> CoreResult<Vec<Arc<Action>>> {
    let document: ActionDocument = serde_json::from_str(json)?;

    for (name, value) in &document.environment {
        log::debug!("Setting environment variable {name}={value}");
        std::env::set_var(name, value);
    }

    Ok(document
        .actions
        .into_iter()
        .map(|json| Arc::new(json.into_action(registry)))
        .collect())
}

/// Write an exported action document to disk.
pub fn write_action_file(
    path: &Path,
    actions: &[Arc<Action>],
    environment: &BTreeMap<String, String>,
) -> CoreResult<()> {
    let json = export_actions(actions, environment)?;
    std::fs::write(path, json).map_err(|e| CoreError::io(path, e))
}

/// Read and import an action document from disk.
pub fn read_action_file(path: &Path, registry: &FileItemRegistry) -> CoreResult<Vec<Arc<Action>>> {
    let json = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
    import_actions(&json, registry)
}
