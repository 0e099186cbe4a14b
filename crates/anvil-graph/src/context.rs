//! Per-invocation build context
//!
//! Everything that would otherwise be a process-wide static lives here and is
//! passed down explicitly, which keeps tests hermetic: two contexts never
//! share file identities or caches.

use anvil_cache::CacheRegistry;
use anvil_core::FileItemRegistry;

/// Owns the interned file identities and the dependency cache registry for
/// one build invocation.
#[derive(Default)]
pub struct BuildContext {
    /// All file identities referenced by actions.
    pub files: FileItemRegistry,
    /// All dependency caches opened during this build.
    pub caches: CacheRegistry,
}

impl BuildContext {
    /// Create a fresh context with empty registries.
    pub fn new() -> Self {
        Self::default()
    }
}
