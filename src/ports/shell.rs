//! Subprocess port used by the live solver and runtime adapters.

use serde::{Deserialize, Serialize};

use super::PortFuture;

/// Captured output of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOutput {
    /// Exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ShellOutput {
    /// Whether the process exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external programs without a shell.
///
/// Dropping the returned future must terminate the child process, so
/// callers can cancel with `tokio::time::timeout`.
pub trait ShellExecutor: Send + Sync {
    /// Runs `program` with `args` and captures its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned.
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> PortFuture<'a, ShellOutput>;
}
