//! Single chunk file handle.
//!
//! [`RawChunk`] owns one chunk file and exposes transactional appends: bytes
//! written between [`RawChunk::tx_begin`] and [`RawChunk::tx_commit`] become
//! part of the committed data only when the commit rewrites the header.  A
//! crash before the header rewrite leaves the previous committed state
//! intact; the stray tail is discarded the next time the file is opened.
//!
//! The metadata slot is written either immediately (outside a transaction)
//! or buffered and flushed together with the data at commit, so a chunk's
//! descriptor and its payload always move in step.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{EngineError, EngineResult};
use crate::format::{ChunkHeader, CHUNK_HEADER_SIZE, DATA_OFFSET, META_CAPACITY};

/// Handle to a single on-disk chunk file.
#[derive(Debug)]
pub struct RawChunk {
    path: PathBuf,
    file: Option<File>,
    committed: u64,
    pending_len: u64,
    meta: Vec<u8>,
    pending_meta: Option<Vec<u8>>,
    in_tx: bool,
}

impl RawChunk {
    /// Create a new chunk file at `path`.
    ///
    /// Fails if the file already exists.  The file starts with an empty
    /// committed region and an empty metadata slot.
    pub fn create(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| EngineError::io(&path, e))?;

        let header = ChunkHeader::for_state(0, &[]);
        file.write_all(&header.encode())
            .map_err(|e| EngineError::io(&path, e))?;
        file.sync_all().map_err(|e| EngineError::io(&path, e))?;

        Ok(Self {
            path,
            file: Some(file),
            committed: 0,
            pending_len: 0,
            meta: Vec::new(),
            pending_meta: None,
            in_tx: false,
        })
    }

    /// Open an existing chunk file, validating its header and metadata.
    ///
    /// Any data bytes beyond the committed length are left over from an
    /// interrupted transaction and are discarded here.
    pub fn open(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| EngineError::io(&path, e))?;

        let file_len = file
            .metadata()
            .map_err(|e| EngineError::io(&path, e))?
            .len();
        if file_len < CHUNK_HEADER_SIZE as u64 {
            return Err(EngineError::TooShort { len: file_len });
        }

        let mut raw = [0u8; CHUNK_HEADER_SIZE];
        file.read_exact(&mut raw)
            .map_err(|e| EngineError::io(&path, e))?;
        let header = ChunkHeader::decode(&raw)?;

        if header.meta_len as usize > META_CAPACITY {
            return Err(EngineError::MetadataTooLarge {
                size: header.meta_len as usize,
                capacity: META_CAPACITY,
            });
        }
        if file_len < CHUNK_HEADER_SIZE as u64 + header.meta_len as u64 {
            return Err(EngineError::TooShort { len: file_len });
        }

        let mut meta = vec![0u8; header.meta_len as usize];
        file.read_exact(&mut meta)
            .map_err(|e| EngineError::io(&path, e))?;
        header.validate_meta(&meta)?;

        let available = file_len.saturating_sub(DATA_OFFSET);
        if available < header.committed {
            return Err(EngineError::Truncated {
                committed: header.committed,
                available,
            });
        }
        if available > header.committed {
            file.set_len(DATA_OFFSET + header.committed)
                .map_err(|e| EngineError::io(&path, e))?;
            tracing::debug!(
                path = %path.display(),
                dropped = available - header.committed,
                "Discarded uncommitted tail"
            );
        }

        Ok(Self {
            path,
            file: Some(file),
            committed: header.committed,
            pending_len: 0,
            meta,
            pending_meta: None,
            in_tx: false,
        })
    }

    /// Begin a write transaction.  A no-op if one is already open.
    pub fn tx_begin(&mut self) -> EngineResult<()> {
        if self.file.is_none() {
            return Err(EngineError::Closed);
        }
        self.in_tx = true;
        Ok(())
    }

    /// Append bytes within the open transaction.
    ///
    /// The bytes land after the committed region plus whatever this
    /// transaction has already written; they stay invisible to readers until
    /// [`RawChunk::tx_commit`].
    pub fn write(&mut self, data: &[u8]) -> EngineResult<()> {
        if !self.in_tx {
            return Err(EngineError::NoTransaction);
        }
        let offset = DATA_OFFSET + self.committed + self.pending_len;
        let file = self.file.as_mut().ok_or(EngineError::Closed)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| EngineError::io(&self.path, e))?;
        file.write_all(data)
            .map_err(|e| EngineError::io(&self.path, e))?;
        self.pending_len += data.len() as u64;
        Ok(())
    }

    /// Commit the open transaction, publishing its writes.
    ///
    /// A no-op when no transaction is open.  Pending metadata is flushed to
    /// the slot, then the header is rewritten with the new committed length.
    pub fn tx_commit(&mut self) -> EngineResult<()> {
        if !self.in_tx {
            return Ok(());
        }
        if self.pending_len == 0 && self.pending_meta.is_none() {
            self.in_tx = false;
            return Ok(());
        }

        let file = self.file.as_mut().ok_or(EngineError::Closed)?;
        let meta: &[u8] = self.pending_meta.as_deref().unwrap_or(&self.meta);
        if self.pending_meta.is_some() {
            file.seek(SeekFrom::Start(CHUNK_HEADER_SIZE as u64))
                .map_err(|e| EngineError::io(&self.path, e))?;
            file.write_all(meta)
                .map_err(|e| EngineError::io(&self.path, e))?;
        }

        // Data and metadata must be durable before the header points at them.
        file.sync_data().map_err(|e| EngineError::io(&self.path, e))?;

        let header = ChunkHeader::for_state(self.committed + self.pending_len, meta);
        file.seek(SeekFrom::Start(0))
            .map_err(|e| EngineError::io(&self.path, e))?;
        file.write_all(&header.encode())
            .map_err(|e| EngineError::io(&self.path, e))?;
        file.sync_data().map_err(|e| EngineError::io(&self.path, e))?;

        self.committed += self.pending_len;
        self.pending_len = 0;
        if let Some(m) = self.pending_meta.take() {
            self.meta = m;
        }
        self.in_tx = false;
        Ok(())
    }

    /// Abort the open transaction, discarding its writes and any pending
    /// metadata.  A no-op when no transaction is open.
    pub fn tx_rollback(&mut self) -> EngineResult<()> {
        if !self.in_tx {
            return Ok(());
        }
        self.pending_meta = None;
        if self.pending_len > 0 {
            let file = self.file.as_mut().ok_or(EngineError::Closed)?;
            file.set_len(DATA_OFFSET + self.committed)
                .map_err(|e| EngineError::io(&self.path, e))?;
            self.pending_len = 0;
        }
        self.in_tx = false;
        Ok(())
    }

    /// Store a metadata blob in the chunk's metadata slot.
    ///
    /// Inside a transaction the blob is buffered and becomes durable at
    /// commit; outside one it is written and synced immediately.
    pub fn set_metadata(&mut self, blob: &[u8]) -> EngineResult<()> {
        if blob.len() > META_CAPACITY {
            return Err(EngineError::MetadataTooLarge {
                size: blob.len(),
                capacity: META_CAPACITY,
            });
        }
        if self.file.is_none() {
            return Err(EngineError::Closed);
        }
        if self.in_tx {
            self.pending_meta = Some(blob.to_vec());
            return Ok(());
        }

        let file = self.file.as_mut().ok_or(EngineError::Closed)?;
        file.seek(SeekFrom::Start(CHUNK_HEADER_SIZE as u64))
            .map_err(|e| EngineError::io(&self.path, e))?;
        file.write_all(blob)
            .map_err(|e| EngineError::io(&self.path, e))?;

        let header = ChunkHeader::for_state(self.committed, blob);
        file.seek(SeekFrom::Start(0))
            .map_err(|e| EngineError::io(&self.path, e))?;
        file.write_all(&header.encode())
            .map_err(|e| EngineError::io(&self.path, e))?;
        file.sync_data().map_err(|e| EngineError::io(&self.path, e))?;

        self.meta = blob.to_vec();
        Ok(())
    }

    /// The current metadata blob (pending value if one is buffered).
    pub fn metadata(&self) -> &[u8] {
        self.pending_meta.as_deref().unwrap_or(&self.meta)
    }

    /// Read the committed data bytes.
    pub fn data(&mut self) -> EngineResult<Bytes> {
        let committed = self.committed;
        let file = self.file.as_mut().ok_or(EngineError::Closed)?;
        file.seek(SeekFrom::Start(DATA_OFFSET))
            .map_err(|e| EngineError::io(&self.path, e))?;
        let mut buf = vec![0u8; committed as usize];
        file.read_exact(&mut buf)
            .map_err(|e| EngineError::io(&self.path, e))?;
        Ok(Bytes::from(buf))
    }

    /// Total stored bytes: committed plus uncommitted in-transaction writes.
    pub fn bytesize(&self) -> u64 {
        self.committed + self.pending_len
    }

    /// Committed data length.
    pub fn committed_size(&self) -> u64 {
        self.committed
    }

    /// Whether the file handle is still open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the file handle, rolling back any open transaction.
    /// Idempotent.
    pub fn close(&mut self) -> EngineResult<()> {
        if self.in_tx {
            self.tx_rollback()?;
        }
        self.file = None;
        Ok(())
    }

    /// Close the handle and delete the underlying file.
    pub fn unlink(&mut self) -> EngineResult<()> {
        self.close()?;
        fs::remove_file(&self.path).map_err(|e| EngineError::io(&self.path, e))?;
        Ok(())
    }
}
