//! Shared environment mirror read during substitution.

/// Live key-value table of variable assignments consulted during
/// substitution.
///
/// Shared between exactly one writer (the watcher task) and any number of
/// reader call sites (content transformation during presenter operations).
/// A write replaces the whole value of a single key and entries are never
/// removed, so a reader observes either the previous or the new value of a
/// key, never a partial one. A read racing an in-flight shell assignment may
/// return the stale value; consistency is eventual by design.
#[derive(Debug, Default)]
pub struct EnvSnapshot {
    vars: scc::HashMap<String, String>,
}

impl EnvSnapshot {
    /// An empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot seeded from the process environment at the moment of the
    /// call. Later changes to the process environment are not reflected.
    #[must_use]
    pub fn from_process_env() -> Self {
        let snapshot = Self::new();
        for (name, value) in std::env::vars() {
            snapshot.set(name, value);
        }
        snapshot
    }

    /// The current value bound to a name, if any assignment (inherited or
    /// observed) ever set it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.vars.read_sync(name, |_, value| value.clone())
    }

    /// Bind a value to a name, overwriting any previous binding.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.upsert_sync(name.into(), value.into());
    }

    /// Number of distinct names bound.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no name has been bound yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
