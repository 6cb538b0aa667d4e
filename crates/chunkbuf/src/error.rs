//! Buffer error types.

use std::path::{Path, PathBuf};

use chunkbuf_engine::EngineError;

use crate::chunk::ChunkState;
use crate::codec::CodecError;

/// Errors that can occur in the buffering layer.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// Invalid or missing configuration.  Fatal at configure time.
    #[error("configuration error: {0}")]
    Config(String),

    /// A chunk file cannot be opened or its metadata cannot be decoded.
    /// Resume quarantines the file and continues.
    #[error("corrupt chunk file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An operation was invoked in a lifecycle state that forbids it.
    #[error("invalid chunk state for {op}: {state:?}")]
    InvalidState {
        op: &'static str,
        state: ChunkState,
    },

    /// Engine failure outside the corruption path.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Metadata encode/decode failure outside the corruption path.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Filesystem failure outside the engine.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BufferError {
    /// Wrap a per-file failure as a corruption error.
    pub fn corrupt(path: &Path, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            source: Box::new(source),
        }
    }
}

/// Convenience result type.
pub type BufferResult<T> = std::result::Result<T, BufferError>;
