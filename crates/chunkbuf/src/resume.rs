//! Crash-recovery resume.
//!
//! Enumerates persisted chunk files, reconstructs each one, and rebuilds
//! the stage map and flush queue the buffer held before the restart.
//! Files that cannot be loaded are quarantined (warn, best-effort delete,
//! skip) so a single bad file never blocks recovery.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::chunk::{Chunk, ChunkState};
use crate::codec::GroupKey;
use crate::error::BufferError;

/// One directory to recover chunks from.
#[derive(Debug, Clone)]
pub struct ResumeLocation {
    /// Directory holding the chunk files.
    pub dir: PathBuf,
    /// Expected chunk file suffix, without the leading dot.
    pub suffix: String,
}

impl ResumeLocation {
    /// Chunk files in this location, sorted by file name.
    ///
    /// Only regular files named `cio.<anything>.<suffix>` qualify; directory
    /// and suffix components are compared literally, so names containing
    /// glob-significant characters are never misinterpreted.  A missing
    /// directory yields an empty list.
    pub fn chunk_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let dotted_suffix = format!(".{}", self.suffix);
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| matches_chunk_name(name, &dotted_suffix))
            .collect();
        names.sort();
        names.into_iter().map(|name| self.dir.join(name)).collect()
    }
}

fn matches_chunk_name(name: &str, dotted_suffix: &str) -> bool {
    name.strip_prefix("cio.")
        .and_then(|rest| rest.strip_suffix(dotted_suffix))
        .is_some()
}

/// Chunks reconstructed by a resume pass.
#[derive(Debug, Default)]
pub struct ResumedState {
    /// Staged chunks keyed by grouping key.
    pub stage: HashMap<GroupKey, Chunk>,
    /// Queued chunks, FIFO by commit time.
    pub queue: Vec<Chunk>,
}

/// Scanner that rebuilds buffer state from disk.
#[derive(Debug)]
pub struct ResumeScanner {
    primary: ResumeLocation,
    legacy: Option<ResumeLocation>,
}

impl ResumeScanner {
    /// Create a scanner over one location.
    pub fn new(primary: ResumeLocation) -> Self {
        Self {
            primary,
            legacy: None,
        }
    }

    /// Also recover from a legacy location.  Its staged chunks win on
    /// grouping-key collisions and its queued chunks join the same queue.
    pub fn with_legacy(mut self, legacy: ResumeLocation) -> Self {
        self.legacy = Some(legacy);
        self
    }

    /// Scan the configured locations.
    ///
    /// Never fails: missing directories yield empty results, corrupt files
    /// are quarantined, and chunks in an unexpected state are dropped with
    /// a warning (their files are kept).  The queue comes back sorted by
    /// commit time, ties in enumeration order.
    pub fn scan(&self) -> ResumedState {
        let mut state = ResumedState::default();
        scan_location(&self.primary, &mut state);

        if let Some(legacy) = &self.legacy {
            let mut legacy_state = ResumedState::default();
            scan_location(legacy, &mut legacy_state);
            state.stage.extend(legacy_state.stage);
            state.queue.append(&mut legacy_state.queue);
        }

        state.queue.sort_by_key(|chunk| chunk.modified_at());
        state
    }
}

fn scan_location(location: &ResumeLocation, state: &mut ResumedState) {
    for path in location.chunk_files() {
        let chunk = match Chunk::assume(&path) {
            Ok(chunk) => chunk,
            Err(e) => {
                quarantine(&path, &e);
                continue;
            }
        };

        match chunk.state() {
            ChunkState::Staged => {
                state.stage.insert(chunk.group_key().clone(), chunk);
            }
            ChunkState::Queued => state.queue.push(chunk),
            other => {
                tracing::warn!(
                    path = %path.display(),
                    state = ?other,
                    "Unknown state chunk found"
                );
            }
        }
    }
}

/// Warn about a chunk file that cannot be loaded and delete it.  Deletion
/// failure is logged, not propagated.
fn quarantine(path: &Path, error: &BufferError) {
    tracing::warn!(
        path = %path.display(),
        error = %error,
        "Found broken chunk file during resume, deleting"
    );
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "Tried to unlink broken chunk file but failed"
        );
    }
}
