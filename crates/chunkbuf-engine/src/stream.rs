//! Named-stream addressing under a context root.
//!
//! A [`Stream`] binds a directory for one logical stream of chunks.  It does
//! no I/O on construction; the caller creates the directory before chunks
//! are opened through it.

use std::path::{Path, PathBuf};

use crate::chunk::RawChunk;
use crate::error::EngineResult;

/// One logical chunk stream rooted at `<context_root>/<stream_name>`.
#[derive(Debug, Clone)]
pub struct Stream {
    dir: PathBuf,
}

impl Stream {
    /// Bind a stream directory.  `stream_name` may contain path separators
    /// for nested streams.
    pub fn new(context_root: impl AsRef<Path>, stream_name: &str) -> Self {
        Self {
            dir: context_root.as_ref().join(stream_name),
        }
    }

    /// The stream's directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a chunk file name within this stream.
    pub fn chunk_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Create a new chunk file in this stream.
    pub fn create_chunk(&self, file_name: &str) -> EngineResult<RawChunk> {
        RawChunk::create(self.chunk_path(file_name))
    }

    /// Open an existing chunk file in this stream.
    pub fn open_chunk(&self, file_name: &str) -> EngineResult<RawChunk> {
        RawChunk::open(self.chunk_path(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_stream_paths() {
        let stream = Stream::new("/data/buffers", "events/worker0");
        assert_eq!(
            stream.dir(),
            Path::new("/data/buffers/events/worker0")
        );
        assert_eq!(
            stream.chunk_path("cio.ab.buf"),
            PathBuf::from("/data/buffers/events/worker0/cio.ab.buf")
        );
    }

    #[test]
    fn test_stream_create_and_open() {
        let dir = std::env::temp_dir().join("chunkbuf-test-stream");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("logs")).unwrap();

        let stream = Stream::new(&dir, "logs");
        let mut chunk = stream.create_chunk("cio.00.buf").unwrap();
        chunk.tx_begin().unwrap();
        chunk.write(b"payload").unwrap();
        chunk.tx_commit().unwrap();
        chunk.close().unwrap();

        let mut chunk = stream.open_chunk("cio.00.buf").unwrap();
        assert_eq!(chunk.data().unwrap().as_ref(), b"payload");

        let _ = fs::remove_dir_all(&dir);
    }
}
