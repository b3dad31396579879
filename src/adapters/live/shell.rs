//! Live subprocess executor using `tokio::process::Command`.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::ports::{PortFuture, ShellExecutor, ShellOutput};

/// Runs programs directly (no shell) and captures their output. The child
/// is killed when the future is dropped.
pub struct LiveShellExecutor;

impl ShellExecutor for LiveShellExecutor {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> PortFuture<'a, ShellOutput> {
        Box::pin(async move {
            debug!(program, args = ?args, "spawning");
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| format!("failed to run {program}: {e}"))?;
            Ok(ShellOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}
