//! The path-based filesystem surface served through the view.
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::env::EnvSnapshot;
use crate::transform::{self, TransformError};

use super::cache::{CacheEntry, ViewCache};
use super::resolve::PathResolver;
use super::{AccessMode, AttrRecord, EntryKind, FileHandle, ViewDirEntry};

/// How regular files that do not decode as UTF-8 text are served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BinaryPolicy {
    /// Serve raw bytes unmodified, with their raw size.
    #[default]
    PassThrough,
    /// Fail the attribute query with an encoding error.
    Reject,
}

impl FromStr for BinaryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass-through" => Ok(Self::PassThrough),
            "reject" => Ok(Self::Reject),
            _ => Err(format!(
                "Invalid binary-file policy '{s}'. Expected 'pass-through' or 'reject'."
            )),
        }
    }
}

impl std::fmt::Display for BinaryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PassThrough => f.write_str("pass-through"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// Failure of an attribute query.
#[derive(Debug, Error)]
pub enum QueryAttrError {
    /// The resolved base path does not exist.
    #[error("entry not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-text content with the `reject` binary policy in force.
    #[error(transparent)]
    Encoding(#[from] TransformError),
}

impl From<QueryAttrError> for i32 {
    fn from(e: QueryAttrError) -> Self {
        match e {
            QueryAttrError::NotFound => libc::ENOENT,
            QueryAttrError::Io(ref io_err) => io_err.raw_os_error().unwrap_or(libc::EIO),
            QueryAttrError::Encoding(_) => libc::EIO,
        }
    }
}

/// Failure of a directory listing.
#[derive(Debug, Error)]
pub enum ListDirError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ListDirError> for i32 {
    fn from(e: ListDirError) -> Self {
        match e {
            ListDirError::Io(ref io_err) => io_err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Failure of a content read.
#[derive(Debug, Error)]
pub enum ReadError {
    /// No attribute query ever populated this path.
    #[error("content not cached")]
    NotCached,
}

impl From<ReadError> for i32 {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::NotCached => libc::EBADF,
        }
    }
}

/// Failure of an access check.
#[derive(Debug, Error)]
pub enum CheckAccessError {
    /// The base path refused the requested mode bits.
    #[error("access denied: {0}")]
    Denied(nix::errno::Errno),
}

impl From<CheckAccessError> for i32 {
    fn from(e: CheckAccessError) -> Self {
        match e {
            CheckAccessError::Denied(_) => libc::EACCES,
        }
    }
}

/// Failure of a handle release.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("file not open")]
    FileNotOpen,
}

impl From<ReleaseError> for i32 {
    fn from(e: ReleaseError) -> Self {
        match e {
            ReleaseError::FileNotOpen => libc::EBADF,
        }
    }
}

/// The filesystem-operation surface of the view.
///
/// Owns the attribute/content cache and the set of live file handles. The
/// transport dispatches one operation at a time, so neither needs interior
/// locking; the environment snapshot is the only state shared with another
/// task.
pub struct OverlayFs {
    resolver: PathResolver,
    cache: ViewCache,
    handles: HashMap<FileHandle, PathBuf>,
    next_fh: FileHandle,
    env: Arc<EnvSnapshot>,
    binary_files: BinaryPolicy,
}

impl OverlayFs {
    /// A view over `base`, substituting from `env`.
    pub fn new(base: impl Into<PathBuf>, env: Arc<EnvSnapshot>, binary_files: BinaryPolicy) -> Self {
        Self {
            resolver: PathResolver::new(base),
            cache: ViewCache::new(),
            handles: HashMap::new(),
            next_fh: 1,
            env,
            binary_files,
        }
    }

    /// The base directory this view mirrors.
    #[must_use]
    pub fn base(&self) -> &Path {
        self.resolver.base()
    }

    /// Stat the base path and, for regular files, read and transform the
    /// full content right away, caching both.
    ///
    /// Transforming at query time keeps the reported size consistent with
    /// the content later served: the transport learns sizes from this call
    /// and bounds every read by them. The cache entry for the path is
    /// replaced wholesale on every query, so edits to the base file (and
    /// freshly observed shell assignments) are picked up here and nowhere
    /// else.
    pub async fn query_attributes(
        &mut self,
        view_path: &Path,
    ) -> Result<AttrRecord, QueryAttrError> {
        let base_path = self.resolver.resolve(view_path);
        let meta = match tokio::fs::symlink_metadata(&base_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QueryAttrError::NotFound);
            }
            Err(e) => return Err(QueryAttrError::Io(e)),
        };

        let mut attr = AttrRecord::from(&meta);
        let content = if meta.is_file() {
            let raw = tokio::fs::read(&base_path).await?;
            match transform::substitute(&raw, &self.env) {
                Ok(substituted) => Some(substituted),
                Err(error) => match self.binary_files {
                    BinaryPolicy::PassThrough => {
                        debug!(path = %view_path.display(), "serving non-text file raw");
                        Some(Bytes::from(raw))
                    }
                    BinaryPolicy::Reject => return Err(QueryAttrError::Encoding(error)),
                },
            }
        } else {
            None
        };

        if let Some(ref content) = content {
            attr.size = content.len() as u64;
        }
        self.cache.store(view_path, CacheEntry { attr, content });
        Ok(attr)
    }

    /// List a directory: the two pseudo-entries first, then the base
    /// directory's entries in listing order.
    ///
    /// A base path that is missing or not a directory yields just the two
    /// pseudo-entries rather than an error, matching permissive
    /// pass-through.
    pub async fn list_directory(
        &mut self,
        view_path: &Path,
    ) -> Result<Vec<ViewDirEntry>, ListDirError> {
        let base_path = self.resolver.resolve(view_path);
        let mut entries = vec![
            ViewDirEntry {
                name: OsString::from("."),
                kind: EntryKind::Directory,
            },
            ViewDirEntry {
                name: OsString::from(".."),
                kind: EntryKind::Directory,
            },
        ];

        let is_dir = tokio::fs::symlink_metadata(&base_path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Ok(entries);
        }

        let mut read_dir = tokio::fs::read_dir(&base_path).await?;
        while let Some(dirent) = read_dir.next_entry().await? {
            let kind =
                EntryKind::try_from(dirent.file_type().await?).unwrap_or(EntryKind::RegularFile);
            entries.push(ViewDirEntry {
                name: dirent.file_name(),
                kind,
            });
        }
        Ok(entries)
    }

    /// Allocate a live handle for a path.
    ///
    /// Content is not touched here: the transport's query-before-open
    /// ordering has already cached it, and handles never own content, so any
    /// number of handles to one path share one cached transformation.
    pub fn open_file(&mut self, view_path: &Path) -> FileHandle {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, view_path.to_path_buf());
        debug!(path = %view_path.display(), fh, "opened");
        fh
    }

    /// The slice `[offset, offset + size)` of the cached transformed
    /// content, clipped to the content length. An offset at or beyond the
    /// end yields an empty result, not an error.
    pub fn read_file(
        &self,
        view_path: &Path,
        offset: u64,
        size: u32,
    ) -> Result<Bytes, ReadError> {
        debug_assert!(
            self.cache.entry(view_path).is_some(),
            "read of {} before any attribute query",
            view_path.display()
        );
        let entry = self.cache.entry(view_path).ok_or_else(|| {
            warn!(path = %view_path.display(), "Read before any attribute query. This is a programming bug");
            ReadError::NotCached
        })?;
        let Some(ref content) = entry.content else {
            warn!(path = %view_path.display(), "Read of a path with no cached content. This is a programming bug");
            return Err(ReadError::NotCached);
        };

        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        if offset >= content.len() {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(size as usize).min(content.len());
        Ok(content.slice(offset..end))
    }

    /// Check the requested mode bits against the resolved base path.
    pub fn check_access(
        &self,
        view_path: &Path,
        mode: AccessMode,
    ) -> Result<(), CheckAccessError> {
        let base_path = self.resolver.resolve(view_path);
        let flags = nix::unistd::AccessFlags::from_bits_truncate(mode.bits());
        nix::unistd::access(&base_path, flags).map_err(CheckAccessError::Denied)
    }

    /// Drop a live handle.
    pub fn release_file(&mut self, fh: FileHandle) -> Result<(), ReleaseError> {
        self.handles.remove(&fh).ok_or_else(|| {
            warn!(fh, "Release of a handle that was never opened. This is a programming bug");
            ReleaseError::FileNotOpen
        })?;
        Ok(())
    }
}
