//! Buffer root: configuration, directory layout, and resume.
//!
//! A [`BufferRoot`] owns the layout `<root>/<stream>/cio.<id>.<suffix>`,
//! applies worker namespacing for multi-worker deployments, claims its root
//! path against double use, and drives the resume scanner at startup.

use std::fs;
use std::path::{Path, PathBuf};

use chunkbuf_engine::Stream;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::codec::GroupKey;
use crate::error::{BufferError, BufferResult};
use crate::registry::{PathClaim, PathRegistry};
use crate::resume::{ResumeLocation, ResumeScanner, ResumedState};

/// Default stream name.
pub const DEFAULT_STREAM_NAME: &str = "buffer";
/// Default chunk file suffix.
pub const DEFAULT_FILE_SUFFIX: &str = "buf";
/// Default permission mode for created buffer directories.
pub const DEFAULT_DIR_PERMISSION: u32 = 0o755;
/// Default upper bound for a single chunk (256 MiB).
pub const DEFAULT_CHUNK_LIMIT_SIZE: u64 = 256 * 1024 * 1024;
/// Default upper bound for the whole buffer (64 GiB).
pub const DEFAULT_TOTAL_LIMIT_SIZE: u64 = 64 * 1024 * 1024 * 1024;

const FILE_NAME: &str = "cio.*";

/// Buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Directory that stores the buffer streams.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Stream name under the root.
    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// Suffix of chunk files.
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,

    /// Permission of created chunk directories, as an octal string.
    #[serde(default)]
    pub dir_permission: Option<String>,

    /// Upper bound for a single chunk, in bytes.
    #[serde(default = "default_chunk_limit_size")]
    pub chunk_limit_size: u64,

    /// Upper bound for all retained chunks, in bytes.
    #[serde(default = "default_total_limit_size")]
    pub total_limit_size: u64,

    /// Total number of workers sharing this buffer root.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// This worker's index.
    #[serde(default)]
    pub worker_id: usize,
}

fn default_stream_name() -> String {
    DEFAULT_STREAM_NAME.to_string()
}

fn default_file_suffix() -> String {
    DEFAULT_FILE_SUFFIX.to_string()
}

fn default_chunk_limit_size() -> u64 {
    DEFAULT_CHUNK_LIMIT_SIZE
}

fn default_total_limit_size() -> u64 {
    DEFAULT_TOTAL_LIMIT_SIZE
}

fn default_workers() -> usize {
    1
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            root: None,
            stream_name: default_stream_name(),
            file_suffix: default_file_suffix(),
            dir_permission: None,
            chunk_limit_size: default_chunk_limit_size(),
            total_limit_size: default_total_limit_size(),
            workers: default_workers(),
            worker_id: 0,
        }
    }
}

impl BufferConfig {
    /// Effective directory permission mode.
    pub fn dir_permission_mode(&self) -> BufferResult<u32> {
        match &self.dir_permission {
            None => Ok(DEFAULT_DIR_PERMISSION),
            Some(s) => u32::from_str_radix(s, 8).map_err(|_| {
                BufferError::Config(format!("dir_permission must be an octal mode, got {s:?}"))
            }),
        }
    }
}

/// A configured buffer rooted at one directory.
#[derive(Debug)]
pub struct BufferRoot {
    config: BufferConfig,
    root: PathBuf,
    stream_name: String,
    stream: Stream,
    legacy: Option<Stream>,
    template: PathBuf,
    dir_permission: u32,
    _claim: PathClaim,
}

impl BufferRoot {
    /// Validate `config` and claim its root path in `registry`.
    ///
    /// All validation happens here, before any I/O.  With more than one
    /// worker the stream is namespaced as `<stream>/worker<id>`, and worker
    /// 0 additionally resumes from the un-namespaced legacy location.
    pub fn configure(config: BufferConfig, registry: &PathRegistry) -> BufferResult<Self> {
        let root = config.root.clone().ok_or_else(|| {
            BufferError::Config("buffer root isn't configured, specify 'root'".to_string())
        })?;
        let root_str = root.to_str().ok_or_else(|| {
            BufferError::Config(format!(
                "buffer root is not valid UTF-8: {}",
                root.display()
            ))
        })?;
        if root_str.is_empty() {
            return Err(BufferError::Config(
                "'root' should be at least one character, empty string is not allowed".to_string(),
            ));
        }
        if root_str.contains('*') {
            return Err(BufferError::Config(format!(
                "buffer root isn't allowed to contain '*': {root_str}"
            )));
        }
        if config.stream_name.is_empty() {
            return Err(BufferError::Config(
                "'stream_name' should be at least one character, empty string is not allowed"
                    .to_string(),
            ));
        }
        if config.worker_id >= config.workers {
            return Err(BufferError::Config(format!(
                "worker_id {} out of range for {} workers",
                config.worker_id, config.workers
            )));
        }
        let dir_permission = config.dir_permission_mode()?;

        let mut stream_name = config.stream_name.clone();
        let mut legacy = None;
        if config.workers > 1 {
            if config.worker_id == 0 {
                // Worker 0 also resumes chunks written before the layout
                // became worker-namespaced.
                legacy = Some(Stream::new(&root, &config.stream_name));
            }
            stream_name = format!("{}/worker{}", stream_name, config.worker_id);
        }

        let claim = registry.claim(&root).ok_or_else(|| {
            BufferError::Config(format!(
                "another buffer already uses the same root path: {}",
                root.display()
            ))
        })?;

        let stream = Stream::new(&root, &stream_name);
        let template = stream.chunk_path(&format!("{}.{}", FILE_NAME, config.file_suffix));

        Ok(Self {
            config,
            root,
            stream_name,
            stream,
            legacy,
            template,
            dir_permission,
            _claim: claim,
        })
    }

    /// Create the chunk directory (and intermediates) with the configured
    /// permission mode.
    pub fn start(&self) -> BufferResult<()> {
        let dir = self.chunk_dir();
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(self.dir_permission);
        }
        builder.create(&dir).map_err(|e| BufferError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// Rebuild the stage map and flush queue from disk.
    pub fn resume(&self) -> ResumedState {
        let mut scanner = ResumeScanner::new(self.primary_location());
        if let Some(legacy) = self.legacy_location() {
            scanner = scanner.with_legacy(legacy);
        }

        let state = scanner.scan();
        tracing::info!(
            dir = %self.chunk_dir().display(),
            staged = state.stage.len(),
            queued = state.queue.len(),
            "Resumed buffer state"
        );
        state
    }

    /// Locations a resume pass reads, primary first.
    pub fn resume_locations(&self) -> Vec<ResumeLocation> {
        let mut locations = vec![self.primary_location()];
        locations.extend(self.legacy_location());
        locations
    }

    fn primary_location(&self) -> ResumeLocation {
        ResumeLocation {
            dir: self.stream.dir().to_path_buf(),
            suffix: self.config.file_suffix.clone(),
        }
    }

    fn legacy_location(&self) -> Option<ResumeLocation> {
        self.legacy.as_ref().map(|stream| ResumeLocation {
            dir: stream.dir().to_path_buf(),
            suffix: self.config.file_suffix.clone(),
        })
    }

    /// Create a fresh writable chunk for `group_key`.
    pub fn generate_chunk(&self, group_key: GroupKey) -> BufferResult<Chunk> {
        let chunk = Chunk::create(&self.template, group_key)?;
        tracing::debug!(chunk_id = %chunk.unique_id(), "Created new chunk");
        Ok(chunk)
    }

    /// Configured buffer root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Effective stream name, including any worker namespace.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Directory chunk files live in.
    pub fn chunk_dir(&self) -> PathBuf {
        self.stream.dir().to_path_buf()
    }

    /// Path template chunk files are created from.
    pub fn chunk_template(&self) -> &Path {
        &self.template
    }

    /// Permission mode applied to created directories.
    pub fn dir_permission(&self) -> u32 {
        self.dir_permission
    }

    /// Configured single-chunk size limit.
    pub fn chunk_limit_size(&self) -> u64 {
        self.config.chunk_limit_size
    }

    /// Configured whole-buffer size limit.
    pub fn total_limit_size(&self) -> u64 {
        self.config.total_limit_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chunkbuf-test-{}", name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(root: &Path) -> BufferConfig {
        BufferConfig {
            root: Some(root.to_path_buf()),
            ..BufferConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = BufferConfig::default();
        assert_eq!(config.root, None);
        assert_eq!(config.stream_name, "buffer");
        assert_eq!(config.file_suffix, "buf");
        assert_eq!(config.dir_permission, None);
        assert_eq!(config.chunk_limit_size, 256 * 1024 * 1024);
        assert_eq!(config.total_limit_size, 64 * 1024 * 1024 * 1024);
        assert_eq!(config.workers, 1);
        assert_eq!(config.worker_id, 0);
    }

    #[test]
    fn test_config_from_json_fills_defaults() {
        let config: BufferConfig = serde_json::from_str(r#"{"root": "/var/buf"}"#).unwrap();
        assert_eq!(config.root, Some(PathBuf::from("/var/buf")));
        assert_eq!(config.stream_name, "buffer");
        assert_eq!(config.file_suffix, "buf");
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_configure_requires_root() {
        let result = BufferRoot::configure(BufferConfig::default(), &PathRegistry::new());
        assert!(matches!(result, Err(BufferError::Config(_))));
    }

    #[test]
    fn test_configure_rejects_empty_names() {
        let registry = PathRegistry::new();

        let mut cfg = config(Path::new(""));
        let result = BufferRoot::configure(cfg.clone(), &registry);
        assert!(matches!(result, Err(BufferError::Config(_))));

        cfg = config(Path::new("/var/buf"));
        cfg.stream_name = String::new();
        let result = BufferRoot::configure(cfg, &registry);
        assert!(matches!(result, Err(BufferError::Config(_))));
    }

    #[test]
    fn test_configure_rejects_wildcard_in_root() {
        let result = BufferRoot::configure(
            config(Path::new("/var/buf/*/x")),
            &PathRegistry::new(),
        );
        assert!(matches!(result, Err(BufferError::Config(_))));
    }

    #[test]
    fn test_configure_rejects_bad_permission() {
        let mut cfg = config(Path::new("/var/buf"));
        cfg.dir_permission = Some("7x8".to_string());
        let result = BufferRoot::configure(cfg, &PathRegistry::new());
        assert!(matches!(result, Err(BufferError::Config(_))));
    }

    #[test]
    fn test_configure_rejects_worker_id_out_of_range() {
        let mut cfg = config(Path::new("/var/buf"));
        cfg.workers = 2;
        cfg.worker_id = 2;
        let result = BufferRoot::configure(cfg, &PathRegistry::new());
        assert!(matches!(result, Err(BufferError::Config(_))));
    }

    #[test]
    fn test_configure_rejects_duplicate_root() {
        let registry = PathRegistry::new();
        let first = BufferRoot::configure(config(Path::new("/var/buf")), &registry).unwrap();

        let result = BufferRoot::configure(config(Path::new("/var/buf")), &registry);
        assert!(matches!(result, Err(BufferError::Config(_))));

        // Dropping the first buffer frees the path.
        drop(first);
        assert!(BufferRoot::configure(config(Path::new("/var/buf")), &registry).is_ok());
    }

    #[test]
    fn test_single_worker_layout() {
        let buffer =
            BufferRoot::configure(config(Path::new("/var/buf")), &PathRegistry::new()).unwrap();
        assert_eq!(buffer.stream_name(), "buffer");
        assert_eq!(buffer.chunk_dir(), PathBuf::from("/var/buf/buffer"));
        assert_eq!(
            buffer.chunk_template(),
            Path::new("/var/buf/buffer/cio.*.buf")
        );
        assert_eq!(buffer.resume_locations().len(), 1);
        assert_eq!(buffer.dir_permission(), 0o755);
        assert_eq!(buffer.chunk_limit_size(), 256 * 1024 * 1024);
        assert_eq!(buffer.total_limit_size(), 64 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_multi_worker_layout() {
        let mut cfg = config(Path::new("/var/buf"));
        cfg.workers = 4;
        cfg.worker_id = 2;
        let buffer = BufferRoot::configure(cfg, &PathRegistry::new()).unwrap();
        assert_eq!(buffer.stream_name(), "buffer/worker2");
        assert_eq!(
            buffer.chunk_template(),
            Path::new("/var/buf/buffer/worker2/cio.*.buf")
        );
        // Only worker 0 reads the legacy location.
        assert_eq!(buffer.resume_locations().len(), 1);
    }

    #[test]
    fn test_worker_zero_gets_legacy_location() {
        let mut cfg = config(Path::new("/var/buf"));
        cfg.workers = 4;
        cfg.worker_id = 0;
        let buffer = BufferRoot::configure(cfg, &PathRegistry::new()).unwrap();

        let locations = buffer.resume_locations();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].dir, PathBuf::from("/var/buf/buffer/worker0"));
        assert_eq!(locations[1].dir, PathBuf::from("/var/buf/buffer"));
    }

    #[test]
    fn test_start_creates_chunk_dir() {
        let dir = test_dir("buffer-start");
        let buffer = BufferRoot::configure(config(&dir), &PathRegistry::new()).unwrap();

        buffer.start().unwrap();
        assert!(buffer.chunk_dir().is_dir());

        // Starting again over an existing directory is fine.
        buffer.start().unwrap();

        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_start_applies_dir_permission() {
        use std::os::unix::fs::PermissionsExt;

        let dir = test_dir("buffer-start-mode");
        let mut cfg = config(&dir);
        cfg.dir_permission = Some("700".to_string());
        let buffer = BufferRoot::configure(cfg, &PathRegistry::new()).unwrap();
        assert_eq!(buffer.dir_permission(), 0o700);

        buffer.start().unwrap();
        let mode = fs::metadata(buffer.chunk_dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_generate_chunk_uses_template() {
        let dir = test_dir("buffer-generate");
        let buffer = BufferRoot::configure(config(&dir), &PathRegistry::new()).unwrap();
        buffer.start().unwrap();

        let chunk = buffer.generate_chunk(GroupKey::for_route("t")).unwrap();
        assert!(chunk.path().starts_with(buffer.chunk_dir()));
        let name = chunk.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("cio."));
        assert!(name.ends_with(".buf"));

        let _ = fs::remove_dir_all(&dir);
    }
}
