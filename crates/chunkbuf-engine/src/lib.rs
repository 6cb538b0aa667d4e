//! Append-only chunk file engine with transactional writes.
//!
//! One chunk is one file: a fixed checksummed header, a metadata slot of
//! [`format::META_CAPACITY`] bytes, and the data region.  Writes are grouped
//! into transactions; bytes become visible only once the header is rewritten
//! at commit.  Opening a file validates the header and metadata checksums and
//! discards any uncommitted tail left behind by an interrupted transaction.

pub mod chunk;
pub mod error;
pub mod format;
pub mod stream;

pub use chunk::RawChunk;
pub use error::{EngineError, EngineResult};
pub use format::{ChunkHeader, CHUNK_HEADER_SIZE, CHUNK_MAGIC, DATA_OFFSET, META_CAPACITY};
pub use stream::Stream;
