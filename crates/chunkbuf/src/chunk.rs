//! Chunk lifecycle.
//!
//! A [`Chunk`] wraps one engine chunk file with the buffering lifecycle: it
//! starts writable (`unstaged`), is staged under its grouping key, queued
//! for flushing, and finally closed or purged.  Appends between commits run
//! inside one engine transaction, and `commit` persists the descriptor
//! together with the data, so a crash never leaves the two out of step.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use chunkbuf_engine::RawChunk;

use crate::codec::{self, GroupKey, MetadataBlob};
use crate::error::{BufferError, BufferResult};
use crate::unique_id::UniqueId;

/// Lifecycle state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Writable; not yet tracked by the flush pipeline.
    Unstaged,
    /// Writable and tracked in the stage map under its grouping key.
    Staged,
    /// Waiting in the flush queue; no further appends.
    Queued,
    /// Handle released; the file remains on disk.
    Closed,
    /// The backing file has been deleted.
    Purged,
}

/// How a chunk binds to its backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a fresh chunk file from a path template.
    Create,
    /// Attach to an existing file, restoring descriptor fields only.
    Load,
    /// Attach to an existing file, restoring the lifecycle state as well.
    Assume,
}

/// One durable buffer chunk.
#[derive(Debug)]
pub struct Chunk {
    raw: RawChunk,
    unique_id: UniqueId,
    group_key: GroupKey,
    state: ChunkState,
    size_committed: u64,
    size_pending: u64,
    created_at: i64,
    modified_at: i64,
    tx_open: bool,
}

impl Chunk {
    /// Bind a chunk to a file.
    ///
    /// With [`OpenMode::Create`], `path` is a template whose `.*.` token is
    /// replaced with the fresh chunk id and `group_key` seeds the
    /// descriptor.  With the other modes `path` is an existing chunk file;
    /// the descriptor is restored from its metadata blob and `group_key`
    /// only applies when the blob is absent.
    pub fn open(mode: OpenMode, path: &Path, group_key: GroupKey) -> BufferResult<Self> {
        match mode {
            OpenMode::Create => Self::create_new(path, group_key),
            OpenMode::Load => Self::attach(path, false, group_key),
            OpenMode::Assume => Self::attach(path, true, group_key),
        }
    }

    /// Create a fresh writable chunk from a path template.
    pub fn create(template: &Path, group_key: GroupKey) -> BufferResult<Self> {
        Self::open(OpenMode::Create, template, group_key)
    }

    /// Attach to an existing chunk file without restoring lifecycle state.
    pub fn load(path: &Path) -> BufferResult<Self> {
        Self::open(OpenMode::Load, path, GroupKey::default())
    }

    /// Attach to an existing chunk file, restoring the lifecycle state from
    /// its enqueued flag.  Used during resume.
    pub fn assume(path: &Path) -> BufferResult<Self> {
        Self::open(OpenMode::Assume, path, GroupKey::default())
    }

    fn create_new(template: &Path, group_key: GroupKey) -> BufferResult<Self> {
        let unique_id = UniqueId::generate();
        let path = resolve_chunk_path(template, &unique_id)?;
        let raw = RawChunk::create(&path)?;
        let now = Utc::now().timestamp();
        Ok(Self {
            raw,
            unique_id,
            group_key,
            state: ChunkState::Unstaged,
            size_committed: 0,
            size_pending: 0,
            created_at: now,
            modified_at: now,
            tx_open: false,
        })
    }

    fn attach(path: &Path, restore_state: bool, fallback_key: GroupKey) -> BufferResult<Self> {
        let raw = RawChunk::open(path).map_err(|e| BufferError::corrupt(path, e))?;
        let file_id = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(UniqueId::from_file_name);

        let now = Utc::now().timestamp();
        let mut chunk = Self {
            unique_id: file_id.unwrap_or_else(UniqueId::generate),
            group_key: fallback_key,
            state: ChunkState::Unstaged,
            size_committed: 0,
            size_pending: 0,
            created_at: now,
            modified_at: now,
            tx_open: false,
            raw,
        };

        let blob = {
            let meta = chunk.raw.metadata();
            if meta.is_empty() {
                // Never staged: nothing to restore.
                return Ok(chunk);
            }
            codec::decode(meta).map_err(|e| BufferError::corrupt(path, e))?
        };

        if let Some(id) = blob.id {
            chunk.unique_id = id;
        }
        chunk.group_key = blob.group_key();
        chunk.size_committed = blob.size.unwrap_or(0);
        chunk.created_at = blob.created_at.unwrap_or(now);
        chunk.modified_at = blob.modified_at.unwrap_or(now);
        if restore_state {
            chunk.state = if blob.enqueued.unwrap_or(false) {
                ChunkState::Queued
            } else {
                ChunkState::Staged
            };
        }
        Ok(chunk)
    }

    /// Append a payload, accounting `declared_size` toward the chunk size.
    ///
    /// Allowed while unstaged or staged.  The first append after a commit or
    /// rollback opens the engine transaction.
    pub fn append(&mut self, data: &[u8], declared_size: u64) -> BufferResult<()> {
        match self.state {
            ChunkState::Unstaged | ChunkState::Staged => {}
            state => return Err(BufferError::InvalidState { op: "append", state }),
        }
        if !self.tx_open {
            self.raw.tx_begin()?;
            self.tx_open = true;
        }
        self.raw.write(data)?;
        self.size_pending += declared_size;
        Ok(())
    }

    /// Publish everything appended since the last commit.
    ///
    /// The descriptor is written with the new size and commit time before
    /// the engine transaction commits, so data and descriptor land
    /// together.  A no-op when nothing is pending.
    pub fn commit(&mut self) -> BufferResult<()> {
        if !self.tx_open {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let size = self.size_committed + self.size_pending;
        let blob = self.descriptor_blob(size, now, self.state == ChunkState::Queued);
        self.raw.set_metadata(&codec::encode(&blob)?)?;
        self.raw.tx_commit()?;
        self.size_committed += self.size_pending;
        self.size_pending = 0;
        self.modified_at = now;
        self.tx_open = false;
        Ok(())
    }

    /// Discard everything appended since the last commit.  A no-op when
    /// nothing is pending.
    pub fn rollback(&mut self) -> BufferResult<()> {
        if !self.tx_open {
            return Ok(());
        }
        self.raw.tx_rollback()?;
        self.size_pending = 0;
        self.tx_open = false;
        Ok(())
    }

    /// Seal the chunk under its grouping key and make it visible to the
    /// flush pipeline.  Valid from the unstaged state only.
    pub fn stage(&mut self) -> BufferResult<()> {
        if self.state != ChunkState::Unstaged {
            return Err(BufferError::InvalidState {
                op: "stage",
                state: self.state,
            });
        }
        let size = self.size_committed + self.size_pending;
        let blob = self.descriptor_blob(size, self.modified_at, false);
        self.raw.set_metadata(&codec::encode(&blob)?)?;
        self.state = ChunkState::Staged;
        Ok(())
    }

    /// Move a staged chunk into the flush queue.  A no-op in any other
    /// state.
    pub fn enqueue(&mut self) -> BufferResult<()> {
        if self.state != ChunkState::Staged {
            return Ok(());
        }
        let blob = self.descriptor_blob(self.size_committed, self.modified_at, true);
        self.raw.set_metadata(&codec::encode(&blob)?)?;
        self.state = ChunkState::Queued;
        Ok(())
    }

    /// Release the chunk handle, keeping the file on disk.  Any open
    /// transaction is rolled back first.  Idempotent; closing a purged
    /// chunk is a no-op.
    pub fn close(&mut self) -> BufferResult<()> {
        if matches!(self.state, ChunkState::Closed | ChunkState::Purged) {
            return Ok(());
        }
        if self.tx_open {
            self.rollback()?;
        }
        self.raw.close()?;
        self.state = ChunkState::Closed;
        Ok(())
    }

    /// Delete the backing file.  Valid from any state; a closed chunk
    /// still has its file removed.  Purging twice is a no-op.
    pub fn purge(&mut self) -> BufferResult<()> {
        if self.state == ChunkState::Purged {
            return Ok(());
        }
        if self.tx_open {
            self.rollback()?;
        }
        self.raw.unlink()?;
        self.state = ChunkState::Purged;
        Ok(())
    }

    /// Chunk identifier.
    pub fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    /// Grouping key this chunk accumulates records for.
    pub fn group_key(&self) -> &GroupKey {
        &self.group_key
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChunkState {
        self.state
    }

    /// Declared size: committed plus pending.
    pub fn size(&self) -> u64 {
        self.size_committed + self.size_pending
    }

    /// Stored byte count, including uncommitted bytes.
    pub fn bytesize(&self) -> u64 {
        self.raw.bytesize()
    }

    /// Whether the chunk holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytesize() == 0
    }

    /// Creation time, Unix seconds.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Last commit time, Unix seconds.
    pub fn modified_at(&self) -> i64 {
        self.modified_at
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.raw.path()
    }

    /// Read the committed bytes.
    pub fn read(&mut self) -> BufferResult<Bytes> {
        Ok(self.raw.data()?)
    }

    /// Cursor over the committed bytes.
    pub fn reader(&mut self) -> BufferResult<io::Cursor<Bytes>> {
        Ok(io::Cursor::new(self.read()?))
    }

    fn descriptor_blob(&self, size: u64, modified_at: i64, enqueued: bool) -> MetadataBlob {
        let mut blob = MetadataBlob {
            id: Some(self.unique_id),
            size: Some(size),
            created_at: Some(self.created_at),
            modified_at: Some(modified_at),
            enqueued: Some(enqueued),
            ..MetadataBlob::default()
        };
        blob.set_group_key(&self.group_key);
        blob
    }
}

/// Substitute the `.*.` token in a chunk path template with the chunk id.
fn resolve_chunk_path(template: &Path, id: &UniqueId) -> BufferResult<PathBuf> {
    let template = template.to_str().ok_or_else(|| {
        BufferError::Config(format!(
            "chunk path template is not valid UTF-8: {}",
            template.display()
        ))
    })?;
    let (prefix, suffix) = template.split_once(".*.").ok_or_else(|| {
        BufferError::Config(format!(
            "chunk path template must contain '.*.': {template}"
        ))
    })?;
    Ok(PathBuf::from(format!(
        "{}.{}.{}",
        prefix,
        id.to_hex(),
        suffix
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chunkbuf-test-{}", name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn template(dir: &Path) -> PathBuf {
        dir.join("cio.*.buf")
    }

    #[test]
    fn test_create_resolves_template() {
        let dir = test_dir("chunk-create");
        let chunk = Chunk::create(&template(&dir), GroupKey::for_route("t")).unwrap();

        let name = chunk.path().file_name().unwrap().to_str().unwrap();
        assert_eq!(name, format!("cio.{}.buf", chunk.unique_id().to_hex()));
        assert!(chunk.path().exists());
        assert_eq!(chunk.state(), ChunkState::Unstaged);
        assert_eq!(chunk.size(), 0);
        assert!(chunk.is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_create_requires_wildcard_token() {
        let dir = test_dir("chunk-no-token");
        let result = Chunk::create(&dir.join("cio.buf"), GroupKey::default());
        assert!(matches!(result, Err(BufferError::Config(_))));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_append_commit_tracks_sizes() {
        let dir = test_dir("chunk-commit");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();

        chunk.append(b"one", 3).unwrap();
        chunk.append(b"two", 2).unwrap();
        assert_eq!(chunk.size(), 5);
        assert_eq!(chunk.bytesize(), 6);

        chunk.commit().unwrap();
        assert_eq!(chunk.size(), 5);
        assert_eq!(chunk.read().unwrap().as_ref(), b"onetwo");

        chunk.append(b"three", 1).unwrap();
        chunk.commit().unwrap();
        assert_eq!(chunk.size(), 6);
        assert_eq!(chunk.read().unwrap().as_ref(), b"onetwothree");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_commit_without_append_writes_nothing() {
        let dir = test_dir("chunk-commit-noop");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();
        let path = chunk.path().to_path_buf();

        chunk.commit().unwrap();
        chunk.close().unwrap();

        let raw = RawChunk::open(&path).unwrap();
        assert!(raw.metadata().is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_rollback_restores_size() {
        let dir = test_dir("chunk-rollback");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();

        chunk.append(b"keep", 2).unwrap();
        chunk.commit().unwrap();

        chunk.append(b"drop", 3).unwrap();
        assert_eq!(chunk.size(), 5);
        chunk.rollback().unwrap();
        assert_eq!(chunk.size(), 2);
        assert_eq!(chunk.read().unwrap().as_ref(), b"keep");

        // Rolling back with nothing pending is well-defined.
        chunk.rollback().unwrap();
        chunk.rollback().unwrap();
        assert_eq!(chunk.size(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_append_rejected_once_queued() {
        let dir = test_dir("chunk-append-queued");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();

        chunk.append(b"a", 1).unwrap();
        chunk.commit().unwrap();
        chunk.stage().unwrap();
        // Staged chunks still take appends.
        chunk.append(b"b", 1).unwrap();
        chunk.commit().unwrap();

        chunk.enqueue().unwrap();
        let result = chunk.append(b"c", 1);
        assert!(matches!(
            result,
            Err(BufferError::InvalidState {
                op: "append",
                state: ChunkState::Queued
            })
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stage_writes_descriptor() {
        let dir = test_dir("chunk-stage");
        let key = GroupKey::for_route("app.log");
        let mut chunk = Chunk::create(&template(&dir), key.clone()).unwrap();
        let path = chunk.path().to_path_buf();
        let id = chunk.unique_id();

        chunk.append(b"payload", 4).unwrap();
        chunk.commit().unwrap();
        chunk.stage().unwrap();
        assert_eq!(chunk.state(), ChunkState::Staged);
        chunk.close().unwrap();

        let raw = RawChunk::open(&path).unwrap();
        let blob = codec::decode(raw.metadata()).unwrap();
        assert_eq!(blob.id, Some(id));
        assert_eq!(blob.size, Some(4));
        assert_eq!(blob.enqueued, Some(false));
        assert_eq!(blob.group_key(), key);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stage_twice_fails() {
        let dir = test_dir("chunk-stage-twice");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();

        chunk.stage().unwrap();
        let result = chunk.stage();
        assert!(matches!(
            result,
            Err(BufferError::InvalidState {
                op: "stage",
                state: ChunkState::Staged
            })
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_enqueue_is_noop_unless_staged() {
        let dir = test_dir("chunk-enqueue");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();

        chunk.enqueue().unwrap();
        assert_eq!(chunk.state(), ChunkState::Unstaged);

        chunk.stage().unwrap();
        chunk.enqueue().unwrap();
        assert_eq!(chunk.state(), ChunkState::Queued);

        chunk.enqueue().unwrap();
        assert_eq!(chunk.state(), ChunkState::Queued);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_assume_restores_staged_and_queued() {
        let dir = test_dir("chunk-assume");
        let key = GroupKey::for_route("restore.me");

        let mut staged = Chunk::create(&template(&dir), key.clone()).unwrap();
        staged.append(b"sss", 3).unwrap();
        staged.commit().unwrap();
        staged.stage().unwrap();
        let staged_path = staged.path().to_path_buf();
        let staged_id = staged.unique_id();
        let staged_modified = staged.modified_at();
        staged.close().unwrap();

        let mut queued = Chunk::create(&template(&dir), key.clone()).unwrap();
        queued.append(b"qq", 2).unwrap();
        queued.commit().unwrap();
        queued.stage().unwrap();
        queued.enqueue().unwrap();
        let queued_path = queued.path().to_path_buf();
        let queued_id = queued.unique_id();
        queued.close().unwrap();

        let restored = Chunk::assume(&staged_path).unwrap();
        assert_eq!(restored.state(), ChunkState::Staged);
        assert_eq!(restored.unique_id(), staged_id);
        assert_eq!(restored.size(), 3);
        assert_eq!(restored.modified_at(), staged_modified);
        assert_eq!(restored.group_key(), &key);

        let mut restored = Chunk::assume(&queued_path).unwrap();
        assert_eq!(restored.state(), ChunkState::Queued);
        assert_eq!(restored.unique_id(), queued_id);
        assert_eq!(restored.read().unwrap().as_ref(), b"qq");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_assume_with_empty_metadata_stays_unstaged() {
        let dir = test_dir("chunk-assume-empty");
        let chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();
        let path = chunk.path().to_path_buf();
        let id = chunk.unique_id();
        drop(chunk);

        let restored = Chunk::assume(&path).unwrap();
        assert_eq!(restored.state(), ChunkState::Unstaged);
        // No blob: the identifier comes from the file name.
        assert_eq!(restored.unique_id(), id);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_assume_with_malformed_metadata_is_corrupt() {
        let dir = test_dir("chunk-assume-bad-meta");
        let path = dir.join(format!("cio.{}.buf", UniqueId::generate().to_hex()));

        let mut raw = RawChunk::create(&path).unwrap();
        raw.set_metadata(&[0xC1, 0xDE, 0xAD]).unwrap();
        raw.close().unwrap();

        let result = Chunk::assume(&path);
        assert!(matches!(result, Err(BufferError::Corrupt { .. })));
        // The file itself is untouched; quarantine is the scanner's call.
        assert!(path.exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_assume_unreadable_file_is_corrupt() {
        let dir = test_dir("chunk-assume-foreign");
        let path = dir.join(format!("cio.{}.buf", UniqueId::generate().to_hex()));
        fs::write(&path, b"not a chunk file").unwrap();

        let result = Chunk::assume(&path);
        assert!(matches!(result, Err(BufferError::Corrupt { .. })));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_restores_descriptor_but_not_state() {
        let dir = test_dir("chunk-load");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::for_route("r")).unwrap();
        chunk.append(b"abcd", 4).unwrap();
        chunk.commit().unwrap();
        chunk.stage().unwrap();
        chunk.enqueue().unwrap();
        let path = chunk.path().to_path_buf();
        let id = chunk.unique_id();
        chunk.close().unwrap();

        let loaded = Chunk::load(&path).unwrap();
        assert_eq!(loaded.state(), ChunkState::Unstaged);
        assert_eq!(loaded.unique_id(), id);
        assert_eq!(loaded.size(), 4);
        assert_eq!(loaded.group_key(), &GroupKey::for_route("r"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_blob_id_wins_over_file_name() {
        let dir = test_dir("chunk-id-precedence");
        let file_id = UniqueId::generate();
        let blob_id = UniqueId::generate();
        let path = dir.join(format!("cio.{}.buf", file_id.to_hex()));

        let mut raw = RawChunk::create(&path).unwrap();
        let blob = MetadataBlob {
            id: Some(blob_id),
            size: Some(1),
            enqueued: Some(false),
            ..MetadataBlob::default()
        };
        raw.set_metadata(&codec::encode(&blob).unwrap()).unwrap();
        raw.close().unwrap();

        let restored = Chunk::assume(&path).unwrap();
        assert_eq!(restored.unique_id(), blob_id);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_close_rolls_back_pending_appends() {
        let dir = test_dir("chunk-close-pending");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();
        chunk.append(b"kept", 1).unwrap();
        chunk.commit().unwrap();
        chunk.append(b"lost", 1).unwrap();
        let path = chunk.path().to_path_buf();
        chunk.close().unwrap();
        assert_eq!(chunk.state(), ChunkState::Closed);

        let mut loaded = Chunk::load(&path).unwrap();
        assert_eq!(loaded.read().unwrap().as_ref(), b"kept");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = test_dir("chunk-close-idem");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();
        chunk.close().unwrap();
        chunk.close().unwrap();
        assert_eq!(chunk.state(), ChunkState::Closed);
        assert!(chunk.path().exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_purge_removes_file() {
        let dir = test_dir("chunk-purge");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();
        chunk.append(b"gone", 1).unwrap();
        chunk.commit().unwrap();
        let path = chunk.path().to_path_buf();

        chunk.purge().unwrap();
        assert_eq!(chunk.state(), ChunkState::Purged);
        assert!(!path.exists());

        // Purging twice is a no-op.
        chunk.purge().unwrap();
        assert_eq!(chunk.state(), ChunkState::Purged);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_purge_after_close_removes_file() {
        let dir = test_dir("chunk-purge-closed");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();
        chunk.append(b"left behind", 1).unwrap();
        chunk.commit().unwrap();
        chunk.close().unwrap();
        let path = chunk.path().to_path_buf();
        assert!(path.exists());

        chunk.purge().unwrap();
        assert_eq!(chunk.state(), ChunkState::Purged);
        assert!(!path.exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_reader_streams_committed_bytes() {
        let dir = test_dir("chunk-reader");
        let mut chunk = Chunk::create(&template(&dir), GroupKey::default()).unwrap();
        chunk.append(b"line1\nline2\n", 2).unwrap();
        chunk.commit().unwrap();

        let mut reader = chunk.reader().unwrap();
        let mut out = String::new();
        std::io::Read::read_to_string(&mut reader, &mut out).unwrap();
        assert_eq!(out, "line1\nline2\n");

        let _ = fs::remove_dir_all(&dir);
    }
}
