//! Engine error types.

use std::path::{Path, PathBuf};

/// Errors that can occur while operating on chunk files.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Underlying filesystem I/O failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file does not begin with the chunk magic bytes.
    #[error("bad magic {found:?}")]
    BadMagic { found: [u8; 4] },

    /// Header or metadata checksum does not match the stored value.
    #[error("checksum mismatch: expected {expected:#010x}, actual {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The file is too small to hold a chunk header or its metadata slot.
    #[error("file too short for chunk layout: {len} bytes")]
    TooShort { len: u64 },

    /// The file does not cover the committed data length its header claims.
    #[error("chunk file truncated: committed {committed} bytes, {available} available")]
    Truncated { committed: u64, available: u64 },

    /// Metadata blob exceeds the fixed slot capacity.
    #[error("metadata too large: {size} bytes exceeds capacity {capacity}")]
    MetadataTooLarge { size: usize, capacity: usize },

    /// Operation on a chunk whose handle has been closed.
    #[error("chunk is closed")]
    Closed,

    /// Write issued outside an open transaction.
    #[error("no open transaction")]
    NoTransaction,
}

impl EngineError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Convenience result type.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
