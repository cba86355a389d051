//! View-relative to base-directory path mapping.
use std::path::{Path, PathBuf};

/// Maps view paths onto the configured base directory.
///
/// Stateless beyond the base root itself. Resolution never fails and never
/// consults the disk; the produced path is syntactically valid whether or not
/// the target exists.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base: PathBuf,
}

impl PathResolver {
    /// Resolver rooted at the given base directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The base directory every view path resolves under.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve a view path to its base-directory counterpart.
    ///
    /// A leading separator is stripped before joining, so the absolute view
    /// paths handed over by the transport land inside the base root instead
    /// of replacing it.
    #[must_use]
    pub fn resolve(&self, view_path: &Path) -> PathBuf {
        let relative = view_path.strip_prefix("/").unwrap_or(view_path);
        self.base.join(relative)
    }
}
