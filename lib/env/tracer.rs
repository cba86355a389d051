//! Parent-shell observation via an external tracing subprocess.
use std::path::PathBuf;
use std::process::Stdio;

use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

/// The variable the shell rebinds around every command as internal
/// bookkeeping; never worth mirroring into the snapshot.
pub const NOISE_KEY: &str = "_";

/// Failure to launch the tracing subprocess.
#[derive(Debug, Error)]
pub enum TracerError {
    /// The tracing executable could not be started.
    #[error("failed to spawn tracer '{program}': {source}")]
    Spawn {
        /// The executable that was invoked.
        program: String,
        /// The underlying spawn failure.
        source: std::io::Error,
    },
    /// The child was spawned but its stdout pipe was not captured.
    #[error("tracer stdout was not captured")]
    NoStdout,
}

/// Launches the external tracer that reports variable bindings in a shell.
///
/// The probe fires on the interpreter's variable-binding routine and prints
/// one `key=value` line per event. Everything downstream of the spawn sees
/// only a line stream, so any observation tool printing the same shape can
/// stand in.
#[derive(Debug, Clone)]
pub struct ShellTracer {
    program: PathBuf,
    pid: Pid,
}

impl ShellTracer {
    /// A tracer aimed at an arbitrary process.
    pub fn new(program: impl Into<PathBuf>, pid: Pid) -> Self {
        Self {
            program: program.into(),
            pid,
        }
    }

    /// A tracer aimed at the shell that started this process.
    pub fn for_parent_shell(program: impl Into<PathBuf>) -> Self {
        Self::new(program, nix::unistd::getppid())
    }

    /// The process id being observed.
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The probe script handed to the tracing tool.
    ///
    /// `bind_variable` is the routine bash funnels every assignment through;
    /// the predicate drops the noise-key rebinds at the source.
    #[must_use]
    pub fn probe_script(&self) -> String {
        format!(
            "uprobe:/proc/{pid}/exe:bind_variable /str(arg0) != \"{noise}\"/ \
             {{ printf(\"%s=%s\\n\", str(arg0), str(arg1)); }}",
            pid = self.pid,
            noise = NOISE_KEY
        )
    }

    /// Spawn the tracer with stdout piped for line streaming.
    ///
    /// The child is killed when the stream is dropped. A tracer that cannot
    /// be launched is reported once and never retried.
    pub fn spawn(&self) -> Result<TracerStream, TracerError> {
        let mut child = Command::new(&self.program)
            .arg("-q")
            .arg("-p")
            .arg(self.pid.to_string())
            .arg("-e")
            .arg(self.probe_script())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TracerError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or(TracerError::NoStdout)?;
        debug!(pid = %self.pid, program = %self.program.display(), "tracer attached");
        Ok(TracerStream {
            child,
            reader: BufReader::new(stdout),
        })
    }
}

/// A live tracer subprocess with its stdout wrapped for line reads.
pub struct TracerStream {
    child: Child,
    reader: BufReader<ChildStdout>,
}

impl TracerStream {
    /// Split into the line reader and the child left to reap after EOF.
    #[must_use]
    pub fn into_parts(self) -> (BufReader<ChildStdout>, Child) {
        (self.reader, self.child)
    }
}
