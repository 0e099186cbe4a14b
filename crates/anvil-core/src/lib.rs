//! Anvil build engine data model
//!
//! Provides the core types shared by the incremental build engine:
//! - File identity with cached filesystem metadata (`FileItem`)
//! - Immutable build step descriptions (`Action`)
//! - JSON interchange for out-of-process execution

pub mod action;
pub mod error;
pub mod file_item;
pub mod json;

// Re-export main types
pub use action::{Action, ActionType};
pub use error::{CoreError, CoreResult};
pub use file_item::{FileInfo, FileItem, FileItemRegistry};
pub use json::{export_actions, import_actions, read_action_file, write_action_file};
