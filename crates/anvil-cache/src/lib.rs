//! Persisted caches for the anvil incremental build engine
//!
//! Two kinds of state survive across build invocations:
//! - `DependencyCache`: parsed transitive dependencies (headers) declared by
//!   compiler-emitted dependency list files, memoized by write time and
//!   persisted in a versioned binary format. Caches are hierarchical: a
//!   project-local cache can delegate lookups outside its base directory to a
//!   shared parent (e.g. an engine-level cache).
//! - `ActionHistory`: the command line that last produced each output file,
//!   used to detect command-line-only staleness.
//!
//! All reads are fail-safe: corruption, version mismatches, and unreadable
//! files degrade to cache misses (extra rebuilding), never to wrong builds.

pub mod dep_cache;
pub mod depfile;
pub mod error;
pub mod history;
pub mod registry;

// Re-export main types
pub use dep_cache::{DependencyCache, DEPENDENCY_CACHE_VERSION};
pub use depfile::parse_dependency_file;
pub use error::{CacheError, CacheResult};
pub use history::{ActionHistory, ACTION_HISTORY_VERSION};
pub use registry::CacheRegistry;
