//! Immutable build step descriptions

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::file_item::FileItem;

/// Kind of build action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    /// Generate project or makefiles
    BuildProject,
    /// Compile a source file to an object file
    Compile,
    /// Assemble an application bundle
    CreateAppBundle,
    /// Generate debug information for a binary
    GenerateDebugInfo,
    /// Link object files into a library or executable
    Link,
    /// Write receipt/metadata files describing a build product
    WriteMetadata,
    /// Arbitrary post-build step
    PostBuildStep,
    /// Parse compiler timing traces
    ParseTimingInfo,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildProject => write!(f, "BuildProject"),
            Self::Compile => write!(f, "Compile"),
            Self::CreateAppBundle => write!(f, "CreateAppBundle"),
            Self::GenerateDebugInfo => write!(f, "GenerateDebugInfo"),
            Self::Link => write!(f, "Link"),
            Self::WriteMetadata => write!(f, "WriteMetadata"),
            Self::PostBuildStep => write!(f, "PostBuildStep"),
            Self::ParseTimingInfo => write!(f, "ParseTimingInfo"),
        }
    }
}

/// One build step: a command with declared inputs and outputs.
///
/// Immutable after construction. Identity for merge and conflict purposes is
/// the first produced item.
#[derive(Debug, Clone)]
pub struct Action {
    /// What kind of step this is
    pub action_type: ActionType,
    /// Files that must exist and be up to date before this action runs
    pub prerequisite_items: Vec<Arc<FileItem>>,
    /// Files this action creates
    pub produced_items: Vec<Arc<FileItem>>,
    /// Files deleted before the action runs
    pub delete_items: Vec<Arc<FileItem>>,
    /// Compiler-emitted list of extra discovered dependencies (headers)
    pub dependency_list_file: Option<Arc<FileItem>>,
    /// Compiled module interface produced alongside the object file, if any
    pub compiled_module_interface_file: Option<Arc<FileItem>>,
    /// Directory the command runs in
    pub working_directory: PathBuf,
    /// Executable to invoke
    pub command_path: PathBuf,
    /// Arguments passed to the executable
    pub command_arguments: String,
    /// Human-readable description of the command
    pub command_description: String,
    /// Short status line shown while the action runs
    pub status_description: String,
    /// Whether the action may run on a remote worker
    pub can_execute_remotely: bool,
    /// Whether the action may run remotely under SN-DBS
    pub can_execute_remotely_with_sndbs: bool,
    /// Whether the command is a GCC-style compiler (affects output filtering)
    pub is_gcc_compiler: bool,
    /// Whether the status description should be printed
    pub should_output_status_description: bool,
    /// Whether the action produces a `.lib`-style import library
    pub produces_import_library: bool,
}

impl Action {
    /// Create an empty action of the given type
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            prerequisite_items: Vec::new(),
            produced_items: Vec::new(),
            delete_items: Vec::new(),
            dependency_list_file: None,
            compiled_module_interface_file: None,
            working_directory: PathBuf::new(),
            command_path: PathBuf::new(),
            command_arguments: String::new(),
            command_description: String::new(),
            status_description: String::new(),
            can_execute_remotely: false,
            can_execute_remotely_with_sndbs: false,
            is_gcc_compiler: false,
            should_output_status_description: true,
            produces_import_library: false,
        }
    }

    /// Set the command to run
    pub fn with_command(
        mut self,
        working_directory: impl Into<PathBuf>,
        command_path: impl Into<PathBuf>,
        command_arguments: impl Into<String>,
    ) -> Self {
        self.working_directory = working_directory.into();
        self.command_path = command_path.into();
        self.command_arguments = command_arguments.into();
        self
    }

    /// Add prerequisite items
    pub fn with_prerequisites(mut self, items: Vec<Arc<FileItem>>) -> Self {
        self.prerequisite_items = items;
        self
    }

    /// Add produced items
    pub fn with_produced(mut self, items: Vec<Arc<FileItem>>) -> Self {
        self.produced_items = items;
        self
    }

    /// Add items deleted before the action runs
    pub fn with_delete(mut self, items: Vec<Arc<FileItem>>) -> Self {
        self.delete_items = items;
        self
    }

    /// Set the dependency list file
    pub fn with_dependency_list_file(mut self, item: Arc<FileItem>) -> Self {
        self.dependency_list_file = Some(item);
        self
    }

    /// Set the status description
    pub fn with_status_description(mut self, description: impl Into<String>) -> Self {
        self.status_description = description.into();
        self
    }

    /// Mark the action as producing an import library
    pub fn with_import_library(mut self, produces_import_library: bool) -> Self {
        self.produces_import_library = produces_import_library;
        self
    }

    /// The first produced item, which serves as the action's identity when
    /// multiple target graphs are merged.
    pub fn first_produced_item(&self) -> Option<&Arc<FileItem>> {
        self.produced_items.first()
    }

    /// Full command line as compared against the action history.
    pub fn full_command_line(&self) -> String {
        format!(
            "{} {}",
            self.command_path.display(),
            self.command_arguments
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status_description.is_empty() {
            write!(f, "{}", self.full_command_line())
        } else {
            write!(f, "{}", self.status_description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_item::FileItemRegistry;

    #[test]
    fn builder_populates_fields() {
        let registry = FileItemRegistry::new();
        let src = registry.item("/src/main.c");
        let obj = registry.item("/out/main.o");

        let action = Action::new(ActionType::Compile)
            .with_command("/src", "/usr/bin/cc", "-c main.c -o /out/main.o")
            .with_prerequisites(vec![Arc::clone(&src)])
            .with_produced(vec![Arc::clone(&obj)])
            .with_status_description("main.c");

        assert_eq!(action.action_type, ActionType::Compile);
        assert_eq!(action.prerequisite_items, vec![src]);
        assert_eq!(action.first_produced_item(), Some(&obj));
        assert_eq!(
            action.full_command_line(),
            "/usr/bin/cc -c main.c -o /out/main.o"
        );
    }

    #[test]
    fn display_prefers_status_description() {
        let action = Action::new(ActionType::Link)
            .with_command("/", "/usr/bin/ld", "-o app")
            .with_status_description("app");
        assert_eq!(action.to_string(), "app");

        let bare = Action::new(ActionType::Link).with_command("/", "/usr/bin/ld", "-o app");
        assert_eq!(bare.to_string(), "/usr/bin/ld -o app");
    }

    #[test]
    fn action_type_display_matches_json_names() {
        assert_eq!(ActionType::Compile.to_string(), "Compile");
        assert_eq!(
            serde_json::to_string(&ActionType::GenerateDebugInfo).unwrap(),
            "\"GenerateDebugInfo\""
        );
    }
}
