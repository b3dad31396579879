//! Live adapters for real external interactions.

pub mod clock;
pub mod filesystem;
pub mod index;
pub mod runtime;
pub mod shell;
pub mod solver;

use crate::ports::ShellOutput;

/// The most useful failure message of a conda (or pip) invocation: the
/// JSON `message`/`error` field when conda printed one, else stderr, else
/// the exit code.
pub(crate) fn conda_diagnostic(output: &ShellOutput) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&output.stdout) {
        if let Some(msg) = ["message", "error"]
            .iter()
            .find_map(|k| value.get(k).and_then(serde_json::Value::as_str))
        {
            return msg.trim().to_string();
        }
    }
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("exited with code {}", output.exit_code)
    } else {
        stderr.to_string()
    }
}

/// Splits `-e path` into separate arguments; other specs pass through.
pub(crate) fn split_pip_spec(spec: &str) -> Vec<String> {
    match spec.strip_prefix("-e ") {
        Some(path) => vec!["-e".to_string(), path.trim().to_string()],
        None => vec![spec.to_string()],
    }
}
