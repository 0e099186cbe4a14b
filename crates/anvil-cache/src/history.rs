//! Action history: which command line last produced each output
//!
//! Timestamps cannot detect a changed compiler flag, so the engine keeps a
//! persisted digest of the command line that last produced every output
//! file. If the digest differs from the action's current command line the
//! action is outdated regardless of what the timestamps say.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use anvil_core::FileItem;

use crate::error::{CacheError, CacheResult};

/// Magic bytes identifying an anvil action history file.
const HISTORY_MAGIC: [u8; 4] = *b"ANVH";

/// Current history format version; old files are discarded on mismatch.
pub const ACTION_HISTORY_VERSION: u32 = 1;

/// File name used inside a mounted directory.
const HISTORY_FILE_NAME: &str = "action_history.bin";

#[derive(Debug, Serialize, Deserialize)]
struct HistoryHeader {
    magic: [u8; 4],
    version: u32,
}

/// Persisted map from produced file path to the SHA-256 digest of the
/// command line that last produced it.
pub struct ActionHistory {
    location: PathBuf,
    entries: RwLock<HashMap<PathBuf, [u8; 32]>>,
    modified: AtomicBool,
}

impl ActionHistory {
    /// Mount the history stored in `directory`, starting empty when the
    /// file is missing, corrupt, or version-incompatible.
    pub fn mount(directory: impl AsRef<Path>) -> Self {
        let location = directory.as_ref().join(HISTORY_FILE_NAME);
        let entries = Self::read_entries(&location).unwrap_or_default();
        Self {
            location,
            entries: RwLock::new(entries),
            modified: AtomicBool::new(false),
        }
    }

    fn read_entries(location: &Path) -> Option<HashMap<PathBuf, [u8; 32]>> {
        let raw = std::fs::read(location).ok()?;
        let config = bincode::config::standard();

        let (header, header_len): (HistoryHeader, usize) =
            bincode::serde::decode_from_slice(&raw, config).ok()?;
        if header.magic != HISTORY_MAGIC || header.version != ACTION_HISTORY_VERSION {
            log::debug!(
                "Discarding action history {} (incompatible version)",
                location.display()
            );
            return None;
        }

        let (entries, _): (HashMap<PathBuf, [u8; 32]>, usize) =
            bincode::serde::decode_from_slice(&raw[header_len..], config).ok()?;
        Some(entries)
    }

    fn digest(command_line: &str) -> [u8; 32] {
        Sha256::digest(command_line.as_bytes()).into()
    }

    /// Record the command line producing `item`, returning whether it
    /// differs from the recorded one.
    ///
    /// A file with no recorded producer counts as changed: without history
    /// the engine cannot prove the outputs match the current command.
    pub fn update_producing_command_line(
        &self,
        item: &FileItem,
        command_line: &str,
    ) -> bool {
        let digest = Self::digest(command_line);

        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if entries.get(item.path()) == Some(&digest) {
                return false;
            }
        }

        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item.path().to_path_buf(), digest);
        self.modified.store(true, Ordering::Release);
        true
    }

    /// Whether any entry changed since the last save.
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    /// Persist the history, clearing the modified flag on success.
    pub fn save(&self) -> CacheResult<()> {
        let header = HistoryHeader {
            magic: HISTORY_MAGIC,
            version: ACTION_HISTORY_VERSION,
        };

        let config = bincode::config::standard();
        let mut output =
            bincode::serde::encode_to_vec(&header, config).map_err(CacheError::encode)?;
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            output.extend(
                bincode::serde::encode_to_vec(&*entries, config).map_err(CacheError::encode)?,
            );
        }

        if let Some(dir) = self.location.parent() {
            std::fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;
        }
        std::fs::write(&self.location, output).map_err(|e| CacheError::io(&self.location, e))?;

        self.modified.store(false, Ordering::Release);
        Ok(())
    }

    /// Number of recorded outputs.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the history holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
