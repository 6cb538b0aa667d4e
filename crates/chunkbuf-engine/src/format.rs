//! On-disk chunk file layout.
//!
//! A chunk file starts with a fixed 24-byte header, followed by a metadata
//! slot of [`META_CAPACITY`] bytes, followed by the data region:
//!
//! ```text
//! [0..4)    magic "CBK1"
//! [4..8)    CRC32C over bytes [8..24), little-endian
//! [8..16)   committed data length, u64 LE
//! [16..20)  metadata length, u32 LE
//! [20..24)  metadata CRC32C, u32 LE
//! [24..4120)    metadata slot
//! [4120..)      data region
//! ```
//!
//! The header rewrite is the commit point: everything it references must be
//! durable before the new header is.

use crate::error::{EngineError, EngineResult};

/// Size of the chunk file header in bytes.
pub const CHUNK_HEADER_SIZE: usize = 24;

/// Magic bytes identifying a chunk file.
pub const CHUNK_MAGIC: [u8; 4] = *b"CBK1";

/// Fixed capacity of the metadata slot between header and data.
pub const META_CAPACITY: usize = 4096;

/// Byte offset at which chunk data begins.
pub const DATA_OFFSET: u64 = (CHUNK_HEADER_SIZE + META_CAPACITY) as u64;

/// Decoded chunk file header.
///
/// The magic and header checksum are implicit: [`ChunkHeader::encode`]
/// produces them and [`ChunkHeader::decode`] verifies them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Length of committed data in the data region.
    pub committed: u64,
    /// Length of the metadata blob in the metadata slot.
    pub meta_len: u32,
    /// CRC32C over the metadata blob.
    pub meta_crc: u32,
}

impl ChunkHeader {
    /// Build a header describing `committed` data bytes and the given
    /// metadata blob.
    pub fn for_state(committed: u64, meta: &[u8]) -> Self {
        Self {
            committed,
            meta_len: meta.len() as u32,
            meta_crc: crc32c::crc32c(meta),
        }
    }

    /// Serialize this header into its 24-byte on-disk form.
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut buf = [0u8; CHUNK_HEADER_SIZE];
        buf[0..4].copy_from_slice(&CHUNK_MAGIC);
        buf[8..16].copy_from_slice(&self.committed.to_le_bytes());
        buf[16..20].copy_from_slice(&self.meta_len.to_le_bytes());
        buf[20..24].copy_from_slice(&self.meta_crc.to_le_bytes());
        let crc = crc32c::crc32c(&buf[8..24]);
        buf[4..8].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserialize a header from its on-disk form, verifying the magic and
    /// the header checksum.
    pub fn decode(data: &[u8; CHUNK_HEADER_SIZE]) -> EngineResult<Self> {
        let found = [data[0], data[1], data[2], data[3]];
        if found != CHUNK_MAGIC {
            return Err(EngineError::BadMagic { found });
        }

        let expected = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let actual = crc32c::crc32c(&data[8..24]);
        if expected != actual {
            return Err(EngineError::ChecksumMismatch { expected, actual });
        }

        let committed = u64::from_le_bytes([
            data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
        ]);
        let meta_len = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        let meta_crc = u32::from_le_bytes([data[20], data[21], data[22], data[23]]);

        Ok(Self {
            committed,
            meta_len,
            meta_crc,
        })
    }

    /// Verify that a metadata blob matches the checksum recorded in this
    /// header.
    pub fn validate_meta(&self, meta: &[u8]) -> EngineResult<()> {
        let actual = crc32c::crc32c(meta);
        if actual != self.meta_crc {
            return Err(EngineError::ChecksumMismatch {
                expected: self.meta_crc,
                actual,
            });
        }
        Ok(())
    }
}
