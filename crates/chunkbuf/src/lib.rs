//! Durable chunk buffering with crash recovery.
//!
//! This crate is the buffering layer of an event-forwarding pipeline:
//! records are appended into on-disk chunks, chunks move through a
//! staged/queued lifecycle, and on restart the exact pre-crash state is
//! rebuilt from whatever chunk files survive on disk.
//!
//! Storage I/O lives in the `chunkbuf-engine` crate; this crate owns the
//! lifecycle ([`chunk::Chunk`]), the metadata codec ([`codec`]), the
//! recovery pass ([`resume::ResumeScanner`]), and the directory layout
//! ([`buffer::BufferRoot`]).

pub mod buffer;
pub mod chunk;
pub mod codec;
pub mod error;
pub mod registry;
pub mod resume;
pub mod unique_id;

pub use buffer::{BufferConfig, BufferRoot};
pub use chunk::{Chunk, ChunkState, OpenMode};
pub use codec::{CodecError, GroupKey, MetadataBlob};
pub use error::{BufferError, BufferResult};
pub use registry::{PathClaim, PathRegistry};
pub use resume::{ResumeLocation, ResumeScanner, ResumedState};
pub use unique_id::UniqueId;
