//! env-fs shared library.

/// Observation and storage of live shell environment state.
pub mod env;
/// Filesystem view primitives and FUSE plumbing.
pub mod fs;
/// Placeholder substitution over file content.
pub mod transform;
