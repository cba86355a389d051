//! Observation and storage of live shell environment state.

/// Shared environment mirror read during substitution.
pub mod snapshot;
/// Parent-shell observation via an external tracing subprocess.
pub mod tracer;
/// Background synchronization of observed variable assignments.
pub mod watcher;

pub use snapshot::EnvSnapshot;
pub use tracer::ShellTracer;
pub use watcher::WatcherHandle;
