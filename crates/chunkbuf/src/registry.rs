//! Duplicate buffer path registry.
//!
//! Two live buffers must never share a storage root.  The registry hands
//! out claims; dropping a claim releases the path, so a buffer's claim has
//! exactly the buffer's lifetime.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Registry of claimed buffer root paths.
#[derive(Debug, Default, Clone)]
pub struct PathRegistry {
    claimed: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Claim on a buffer root path, released on drop.
#[derive(Debug)]
pub struct PathClaim {
    claimed: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl PathRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path`.  Returns `None` if it is already held.
    pub fn claim(&self, path: &Path) -> Option<PathClaim> {
        let mut claimed = self.claimed.lock();
        if !claimed.insert(path.to_path_buf()) {
            return None;
        }
        Some(PathClaim {
            claimed: Arc::clone(&self.claimed),
            path: path.to_path_buf(),
        })
    }

    /// Whether `path` is currently claimed.
    pub fn is_claimed(&self, path: &Path) -> bool {
        self.claimed.lock().contains(path)
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        self.claimed.lock().remove(&self.path);
    }
}
