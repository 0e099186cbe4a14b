//! Hierarchical, versioned dependency cache
//!
//! Parsing every `.d`/`.txt` file on every build is wasteful: the lists only
//! change when their producing action reruns. Each parsed list is memoized
//! against the list file's own write time and persisted across invocations.
//!
//! Caches are scoped to a base directory and may hold a parent: a lookup for
//! a list file outside the base directory is delegated upward, so a shared
//! engine-level cache serves many projects while each project keeps its own
//! cache for project-local files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use anvil_core::{FileItem, FileItemRegistry};

use crate::depfile::parse_dependency_file;
use crate::error::{CacheError, CacheResult};

/// Magic bytes identifying an anvil dependency cache file.
const CACHE_MAGIC: [u8; 4] = *b"ANVD";

/// Current cache format version. Increment on breaking changes; old files
/// are silently discarded, not migrated.
pub const DEPENDENCY_CACHE_VERSION: u32 = 1;

/// Memoized parse result for one dependency list file.
///
/// Valid only while the file's on-disk write time has not advanced past
/// `last_write_time`.
#[derive(Debug, Clone)]
pub struct DependencyInfo {
    last_write_time: SystemTime,
    files: Vec<Arc<FileItem>>,
}

/// Header prepended to the serialized cache for validation.
#[derive(Debug, Serialize, Deserialize)]
struct CacheHeader {
    magic: [u8; 4],
    version: u32,
}

/// Wire form of one cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    list_file: PathBuf,
    last_write_ticks: i64,
    files: Vec<PathBuf>,
}

/// Nanoseconds since the UNIX epoch, the persisted form of a write time.
fn ticks_of(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

fn time_of(ticks: i64) -> SystemTime {
    if ticks >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_nanos(ticks as u64)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_nanos(ticks.unsigned_abs())
    }
}

/// Persisted memo of parsed dependency list files.
#[derive(Debug)]
pub struct DependencyCache {
    /// Cache file on disk.
    location: PathBuf,
    /// Lookups for files outside this directory go to the parent.
    base_directory: PathBuf,
    /// Optional shared fallback cache.
    parent: Option<Arc<DependencyCache>>,
    /// Entries keyed by dependency list file path.
    entries: RwLock<HashMap<PathBuf, DependencyInfo>>,
    /// Set when a list file was (re-)parsed since the last save.
    modified: AtomicBool,
}

impl DependencyCache {
    /// Load a cache from disk, or start empty if the file is missing,
    /// corrupt, or carries a different format version. This is fail-safe:
    /// a discarded cache only costs reparsing.
    pub fn load(
        location: impl Into<PathBuf>,
        base_directory: impl Into<PathBuf>,
        parent: Option<Arc<DependencyCache>>,
        registry: &FileItemRegistry,
    ) -> Self {
        let location = location.into();
        let entries = match Self::read_entries(&location, registry) {
            Some(entries) => entries,
            None => HashMap::new(),
        };

        Self {
            location,
            base_directory: base_directory.into(),
            parent,
            entries: RwLock::new(entries),
            modified: AtomicBool::new(false),
        }
    }

    fn read_entries(
        location: &Path,
        registry: &FileItemRegistry,
    ) -> Option<HashMap<PathBuf, DependencyInfo>> {
        let raw = std::fs::read(location).ok()?;
        let config = bincode::config::standard();

        let (header, header_len): (CacheHeader, usize) =
            bincode::serde::decode_from_slice(&raw, config).ok()?;
        if header.magic != CACHE_MAGIC || header.version != DEPENDENCY_CACHE_VERSION {
            log::debug!(
                "Discarding dependency cache {} (incompatible version)",
                location.display()
            );
            return None;
        }

        let (records, _): (Vec<EntryRecord>, usize) =
            bincode::serde::decode_from_slice(&raw[header_len..], config).ok()?;

        Some(
            records
                .into_iter()
                .map(|record| {
                    let info = DependencyInfo {
                        last_write_time: time_of(record.last_write_ticks),
                        files: record.files.iter().map(|p| registry.item(p)).collect(),
                    };
                    (record.list_file, info)
                })
                .collect(),
        )
    }

    /// The cache file path.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The directory this cache is responsible for.
    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    /// The fallback cache, if any.
    pub fn parent(&self) -> Option<&Arc<DependencyCache>> {
        self.parent.as_ref()
    }

    /// Whether any entry changed since the last save.
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    /// Resolve a dependency list file to the files it declares.
    ///
    /// Returns `Ok(None)` when the list cannot be obtained (missing or
    /// unreadable file) so the caller can conservatively treat the producing
    /// action as outdated. An unknown list format is a hard error: it means
    /// the toolchain and the engine disagree about what the compiler emits.
    pub fn get_dependencies(
        &self,
        list_file: &Arc<FileItem>,
        registry: &FileItemRegistry,
    ) -> CacheResult<Option<Vec<Arc<FileItem>>>> {
        if let Some(parent) = &self.parent {
            if !list_file.path().starts_with(&self.base_directory) {
                return parent.get_dependencies(list_file, registry);
            }
        }

        let info = list_file.info();
        if !info.exists {
            return Ok(None);
        }

        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.get(list_file.path()) {
                if entry.last_write_time >= info.last_write_time {
                    return Ok(Some(entry.files.clone()));
                }
            }
        }

        let paths = match parse_dependency_file(list_file.path()) {
            Ok(paths) => paths,
            Err(err @ CacheError::UnsupportedFormat { .. }) => return Err(err),
            Err(err) => {
                log::warn!(
                    "Unable to read dependency list {}: {err}",
                    list_file.path().display()
                );
                return Ok(None);
            }
        };

        let files: Vec<Arc<FileItem>> = paths.iter().map(|p| registry.item(p)).collect();

        let entry = DependencyInfo {
            last_write_time: info.last_write_time,
            files: files.clone(),
        };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(list_file.path().to_path_buf(), entry);
        self.modified.store(true, Ordering::Release);

        Ok(Some(files))
    }

    /// Persist the cache, clearing the modified flag on success.
    pub fn save(&self) -> CacheResult<()> {
        let records: Vec<EntryRecord> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .iter()
                .map(|(list_file, info)| EntryRecord {
                    list_file: list_file.clone(),
                    last_write_ticks: ticks_of(info.last_write_time),
                    files: info.files.iter().map(|f| f.path().to_path_buf()).collect(),
                })
                .collect()
        };

        let header = CacheHeader {
            magic: CACHE_MAGIC,
            version: DEPENDENCY_CACHE_VERSION,
        };

        let config = bincode::config::standard();
        let mut output =
            bincode::serde::encode_to_vec(&header, config).map_err(CacheError::encode)?;
        output.extend(
            bincode::serde::encode_to_vec(&records, config).map_err(CacheError::encode)?,
        );

        if let Some(dir) = self.location.parent() {
            std::fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;
        }
        std::fs::write(&self.location, output).map_err(|e| CacheError::io(&self.location, e))?;

        self.modified.store(false, Ordering::Release);
        Ok(())
    }

    /// Number of memoized entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
