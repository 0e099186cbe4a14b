//! File identity and cached filesystem metadata
//!
//! Every file mentioned by an action (input, output, dependency list) is
//! represented by a single `FileItem` per canonical path, interned through a
//! `FileItemRegistry`. Interning makes path comparison a pointer-sized key
//! lookup and lets different actions referring to the same file share one
//! metadata snapshot.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// Cached snapshot of a file's on-disk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// Whether the file exists.
    pub exists: bool,
    /// Size in bytes (zero when the file does not exist).
    pub size: u64,
    /// Last write time (UNIX epoch when the file does not exist).
    pub last_write_time: SystemTime,
}

impl FileInfo {
    fn missing() -> Self {
        Self {
            exists: false,
            size: 0,
            last_write_time: SystemTime::UNIX_EPOCH,
        }
    }

    fn stat(path: &Path) -> Self {
        match fs::metadata(path) {
            Ok(meta) => Self {
                exists: true,
                size: meta.len(),
                last_write_time: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            },
            Err(_) => Self::missing(),
        }
    }
}

/// Canonicalized handle to a single file path.
///
/// Metadata is captured lazily on first query and then served from the cache
/// until `reset_cached_info` is called. The build engine resets items after an
/// action executes, since the filesystem state it cached is then stale.
#[derive(Debug)]
pub struct FileItem {
    path: PathBuf,
    info: RwLock<Option<FileInfo>>,
}

impl FileItem {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            info: RwLock::new(None),
        }
    }

    /// The canonical absolute path this item identifies.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current metadata snapshot, stat-ing the file on first access.
    pub fn info(&self) -> FileInfo {
        if let Some(info) = *self.info.read().unwrap_or_else(|e| e.into_inner()) {
            return info;
        }
        let info = FileInfo::stat(&self.path);
        *self.info.write().unwrap_or_else(|e| e.into_inner()) = Some(info);
        info
    }

    /// Whether the file currently exists (cached).
    pub fn exists(&self) -> bool {
        self.info().exists
    }

    /// File size in bytes (cached, zero if missing).
    pub fn size(&self) -> u64 {
        self.info().size
    }

    /// Last write time (cached, `None` if missing).
    pub fn last_write_time(&self) -> Option<SystemTime> {
        let info = self.info();
        info.exists.then_some(info.last_write_time)
    }

    /// ASCII case-insensitive extension check, e.g. `has_extension("obj")`.
    pub fn has_extension(&self, extension: &str) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension))
    }

    /// Drops the cached metadata so the next query re-stats the file.
    ///
    /// Called after an action executes, since its outputs changed on disk.
    pub fn reset_cached_info(&self) {
        *self.info.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl PartialEq for FileItem {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FileItem {}

impl Hash for FileItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for FileItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Lexically normalize a path: resolve `.` and `..` components without
/// touching the filesystem, so missing files (not yet produced) still get a
/// stable identity.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Interning registry that owns all `FileItem` instances.
///
/// One registry exists per build invocation (owned by the build context);
/// all other structures hold `Arc` handles into it. Reads take a shared lock,
/// so the read-mostly lookup path does not serialize.
#[derive(Debug, Default)]
pub struct FileItemRegistry {
    items: RwLock<HashMap<PathBuf, Arc<FileItem>>>,
}

impl FileItemRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a path, returning the unique `FileItem` for it.
    ///
    /// The path is lexically normalized first; callers are expected to pass
    /// absolute paths (action lists always carry them).
    pub fn item(&self, path: impl AsRef<Path>) -> Arc<FileItem> {
        let key = normalize_path(path.as_ref());

        if let Some(item) = self
            .items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Arc::clone(item);
        }

        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            items
                .entry(key.clone())
                .or_insert_with(|| Arc::new(FileItem::new(key))),
        )
    }

    /// Look up an already-interned path without creating it.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Arc<FileItem>> {
        let key = normalize_path(path.as_ref());
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }

    /// Number of interned items.
    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
