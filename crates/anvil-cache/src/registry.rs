//! Per-location registry of dependency caches
//!
//! Only one `DependencyCache` may exist per on-disk location within a build
//! context; asking for the same location twice with a different base
//! directory or parent is a configuration error, not a silent second
//! instance.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use rayon::prelude::*;

use anvil_core::FileItemRegistry;

use crate::dep_cache::DependencyCache;
use crate::error::{CacheError, CacheResult};

/// Owns every `DependencyCache` opened during a build, keyed by cache file
/// path, and saves the modified ones in parallel at shutdown.
#[derive(Default)]
pub struct CacheRegistry {
    caches: RwLock<HashMap<PathBuf, Arc<DependencyCache>>>,
}

impl CacheRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cache for `location`, loading it on first use.
    ///
    /// An existing instance is validated against the requested base
    /// directory and parent; a mismatch means two callers disagree about
    /// the cache layout and is reported rather than resolved.
    pub fn find_or_create(
        &self,
        location: impl AsRef<Path>,
        base_directory: impl AsRef<Path>,
        parent: Option<Arc<DependencyCache>>,
        registry: &FileItemRegistry,
    ) -> CacheResult<Arc<DependencyCache>> {
        let location = location.as_ref();
        let base_directory = base_directory.as_ref();

        if let Some(existing) = self
            .caches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(location)
        {
            return Self::validate(existing, base_directory, parent.as_ref())
                .map(|()| Arc::clone(existing));
        }

        let mut caches = self.caches.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = caches.get(location) {
            // Lost the insert race; validate against the winner.
            return Self::validate(existing, base_directory, parent.as_ref())
                .map(|()| Arc::clone(existing));
        }

        let cache = Arc::new(DependencyCache::load(
            location,
            base_directory,
            parent,
            registry,
        ));
        caches.insert(location.to_path_buf(), Arc::clone(&cache));
        Ok(cache)
    }

    fn validate(
        existing: &Arc<DependencyCache>,
        base_directory: &Path,
        parent: Option<&Arc<DependencyCache>>,
    ) -> CacheResult<()> {
        if existing.base_directory() != base_directory {
            return Err(CacheError::BaseDirMismatch {
                location: existing.location().to_path_buf(),
                existing: existing.base_directory().to_path_buf(),
                requested: base_directory.to_path_buf(),
            });
        }

        let parents_match = match (existing.parent(), parent) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        if !parents_match {
            return Err(CacheError::ParentMismatch {
                location: existing.location().to_path_buf(),
            });
        }

        Ok(())
    }

    /// Save every modified cache in parallel.
    ///
    /// Write failures are logged and do not abort the batch; a cache that
    /// fails to persist only costs reparsing on the next build.
    pub fn save_all(&self) {
        let caches: Vec<Arc<DependencyCache>> = self
            .caches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        caches
            .par_iter()
            .filter(|cache| cache.is_modified())
            .for_each(|cache| {
                if let Err(err) = cache.save() {
                    log::warn!(
                        "Failed to save dependency cache {}: {err}",
                        cache.location().display()
                    );
                }
            });
    }

    /// Number of registered caches.
    pub fn len(&self) -> usize {
        self.caches.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no caches have been opened.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
