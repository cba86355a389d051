//! Attribute/content cache keyed by view path.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::AttrRecord;

/// One cached materialization of a view path.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Attributes as of the last query, with `size` already rewritten to the
    /// transformed length for regular files.
    pub attr: AttrRecord,
    /// Transformed content for regular files; `None` for everything else.
    pub content: Option<Bytes>,
}

/// Per-path store of the most recently materialized attributes and content.
///
/// Entries are replaced wholesale on every attribute query for the same path
/// and are never merged.
///
/// Known limitation: nothing is ever evicted, so the map grows by one entry
/// per distinct path queried and is only reclaimed when the process exits.
#[derive(Debug, Default)]
pub struct ViewCache {
    entries: HashMap<PathBuf, CacheEntry>,
}

impl ViewCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the entry for a path, replacing any prior one.
    pub fn store(&mut self, view_path: impl Into<PathBuf>, entry: CacheEntry) {
        self.entries.insert(view_path.into(), entry);
    }

    /// The last stored entry for a path, if any query ever populated it.
    #[must_use]
    pub fn entry(&self, view_path: &Path) -> Option<&CacheEntry> {
        self.entries.get(view_path)
    }

    /// Number of distinct paths cached so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any path has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
