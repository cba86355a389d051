//! Background synchronization of observed variable assignments.
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt as _};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::snapshot::EnvSnapshot;
use super::tracer::{NOISE_KEY, ShellTracer};

/// Handle to the running watcher task.
pub struct WatcherHandle {
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop observing the parent shell. Aborting the task drops the tracer
    /// child, which kills the subprocess.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Launch the watcher: attach the tracer and pump its lines into the
/// snapshot until the stream ends or the handle is shut down.
///
/// Attach failures are logged and swallowed; the snapshot then simply keeps
/// the values it was seeded with.
#[must_use]
pub fn spawn(tracer: ShellTracer, env: Arc<EnvSnapshot>) -> WatcherHandle {
    let task = tokio::spawn(async move {
        let stream = match tracer.spawn() {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%error, "could not observe the parent shell; serving a stale environment");
                return;
            }
        };
        let (reader, mut child) = stream.into_parts();
        pump(reader, &env).await;
        match child.wait().await {
            Ok(status) => warn!(%status, "tracer exited; environment updates stopped"),
            Err(error) => warn!(%error, "tracer could not be reaped"),
        }
    });
    WatcherHandle { task }
}

/// Feed `key=value` lines into the snapshot until the stream ends.
///
/// One complete pair is written per accepted line. Lines without a separator
/// and keys outside the export-case convention are dropped without stopping
/// the pump.
pub async fn pump<R>(reader: R, env: &EnvSnapshot)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => apply_line(&line, env),
            Ok(None) => break,
            Err(error) => {
                warn!(%error, "trace stream read failed; environment updates stopped");
                break;
            }
        }
    }
}

/// Apply one observed line, if it parses and passes the filters.
fn apply_line(line: &str, env: &EnvSnapshot) {
    let Some((key, value)) = line.split_once('=') else {
        debug!(line, "dropping trace line without separator");
        return;
    };
    if key == NOISE_KEY {
        return;
    }
    if !is_export_cased(key) {
        debug!(key, "dropping non-exported binding");
        return;
    }
    debug!(key, value, "observed assignment");
    env.set(key, value);
}

/// Shell convention for environment-intended names: at least one upper-case
/// letter and no lower-case ones. Digits and underscores are uncased and do
/// not disqualify a name; a name with no cased character at all fails.
fn is_export_cased(key: &str) -> bool {
    key.chars().any(|c| c.is_ascii_uppercase()) && !key.chars().any(|c| c.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_cased_accepts_upper_digits_and_underscores() {
        assert!(is_export_cased("PORT"));
        assert!(is_export_cased("MY_VAR2"));
        assert!(is_export_cased("A"));
    }

    #[test]
    fn export_cased_rejects_lower_and_uncased_names() {
        assert!(!is_export_cased("path"));
        assert!(!is_export_cased("Path"));
        assert!(!is_export_cased("_"));
        assert!(!is_export_cased("123"));
        assert!(!is_export_cased(""));
    }

    #[test]
    fn apply_line_splits_on_the_first_separator() {
        let env = EnvSnapshot::new();
        apply_line("DSN=user=admin;db=prod", &env);
        assert_eq!(env.get("DSN").as_deref(), Some("user=admin;db=prod"));
    }

    #[test]
    fn apply_line_drops_the_noise_key() {
        let env = EnvSnapshot::new();
        apply_line("_=ignored", &env);
        assert!(env.is_empty());
    }

    #[test]
    fn apply_line_drops_lines_without_separator() {
        let env = EnvSnapshot::new();
        apply_line("garbage-no-equals", &env);
        assert!(env.is_empty());
    }

    #[test]
    fn apply_line_stores_empty_values() {
        let env = EnvSnapshot::new();
        apply_line("EMPTY=", &env);
        assert_eq!(env.get("EMPTY").as_deref(), Some(""));
    }
}
