//! Short-lived cache of loaded indexes.
//!
//! Loading an index means decoding both files and rebuilding the ANN structure,
//! so repeated questions in one chat reuse the last loaded copy for `ttl`.
//! Entries expire on the timer only; a rebuild is not noticed until the entry
//! expires, unless the caller invalidates it or asks for a fresh load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::vector_store::VectorIndex;

struct CachedIndex {
    loaded_at: Instant,
    index: Arc<VectorIndex>,
}

pub struct IndexCache {
    ttl: Duration,
    entries: Mutex<HashMap<PathBuf, CachedIndex>>,
}

impl IndexCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached index for `dir` if it is younger than the ttl, otherwise
    /// call `load` and cache its result. Failed loads are not cached.
    pub fn get_or_load<F>(&self, dir: &Path, load: F) -> Result<Arc<VectorIndex>>
    where
        F: FnOnce() -> Result<VectorIndex>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(cached) = entries.get(dir) {
            if cached.loaded_at.elapsed() < self.ttl {
                tracing::debug!("Index cache hit for {}", dir.display());
                return Ok(Arc::clone(&cached.index));
            }
            tracing::debug!("Index cache entry for {} expired", dir.display());
        }

        let index = Arc::new(load()?);
        entries.insert(
            dir.to_path_buf(),
            CachedIndex {
                loaded_at: Instant::now(),
                index: Arc::clone(&index),
            },
        );
        Ok(index)
    }

    /// Load bypassing any cached copy, and cache the result.
    pub fn load_fresh<F>(&self, dir: &Path, load: F) -> Result<Arc<VectorIndex>>
    where
        F: FnOnce() -> Result<VectorIndex>,
    {
        self.invalidate(dir);
        self.get_or_load(dir, load)
    }

    pub fn invalidate(&self, dir: &Path) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.remove(dir).is_some() {
            tracing::debug!("Invalidated cached index for {}", dir.display());
        }
    }
}
