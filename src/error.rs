//! Error taxonomy for the reconciliation core.
//!
//! Ports report failures as boxed errors; the core maps them into
//! [`OpsError`] with enough context (which key, which comparison) to render
//! an actionable message.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error type returned by every port.
pub type PortError = Box<dyn std::error::Error + Send + Sync>;

/// Malformed requirements document or package reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The document has no `channel-order` section.
    #[error("requirements document has no `channel-order` section")]
    MissingChannelOrder,
    /// The `channel-order` section is not a list of non-empty strings.
    #[error("`channel-order` is malformed: {0}")]
    MalformedChannelOrder(String),
    /// A conda reference names a channel absent from `channel-order`.
    #[error("package `{package}` references channel `{channel}`, which is not listed in `channel-order`")]
    UndeclaredChannel {
        /// The offending package name.
        package: String,
        /// The undeclared channel.
        channel: String,
    },
    /// A dependency string could not be parsed.
    #[error("invalid package reference `{raw}`: {reason}")]
    InvalidReference {
        /// The raw dependency string.
        raw: String,
        /// Why parsing failed.
        reason: String,
    },
    /// The same package name is declared more than once.
    #[error("package `{0}` is declared more than once")]
    DuplicatePackage(String),
    /// A section other than `channel-order` has the wrong shape.
    #[error("section `{section}` is malformed: {reason}")]
    MalformedSection {
        /// The section key.
        section: String,
        /// Why the section was rejected.
        reason: String,
    },
    /// The document is not valid YAML.
    #[error("requirements document is not valid YAML: {0}")]
    Yaml(String),
    /// The document could not be written back as YAML.
    #[error("requirements document cannot be serialized: {0}")]
    Serialize(String),
}

/// The external solver could not produce a package set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct SolveError {
    /// Raw diagnostic reported by the solver.
    pub diagnostic: String,
    /// Whether the failure was a timeout rather than a solver verdict.
    pub timed_out: bool,
}

impl std::fmt::Display for SolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.timed_out {
            write!(f, "solver timed out: {}", self.diagnostic)
        } else {
            write!(f, "solve failed: {}", self.diagnostic)
        }
    }
}

/// The runtime manager could not report the installed package set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeQueryError {
    /// The managed environment does not exist.
    #[error("environment `{0}` does not exist; run `envops sync` to create it")]
    EnvironmentNotFound(String),
    /// The runtime manager failed or is not installed.
    #[error("runtime manager unavailable: {0}")]
    Unavailable(String),
    /// The query did not finish in time.
    #[error("runtime query timed out after {0}s")]
    TimedOut(u64),
}

/// A single failed install or remove item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    /// Package name.
    pub name: String,
    /// Failure message reported by the runtime.
    pub message: String,
}

/// Some install/remove steps failed; completed steps were kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} item(s) applied, {} failed: {}", .succeeded.len(), .failed.len(), failed_names(.failed))]
pub struct PartialApplyError {
    /// Items applied successfully.
    pub succeeded: Vec<String>,
    /// Items that failed, with the runtime's message.
    pub failed: Vec<FailedItem>,
}

fn failed_names(failed: &[FailedItem]) -> String {
    failed.iter().map(|f| format!("{} ({})", f.name, f.message)).collect::<Vec<_>>().join(", ")
}

/// Top-level error for every core operation.
#[derive(Debug, Error)]
pub enum OpsError {
    /// Malformed requirements.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Solver failure.
    #[error(transparent)]
    Solve(#[from] SolveError),
    /// Runtime query failure.
    #[error(transparent)]
    RuntimeQuery(#[from] RuntimeQueryError),
    /// Another invocation holds the project state lock.
    #[error("project state at {} is locked by another envops process{}", .path.display(), holder_suffix(.holder.as_deref()))]
    ConcurrentAccess {
        /// The lock file.
        path: PathBuf,
        /// Holder description read from the lock file, if any.
        holder: Option<String>,
    },
    /// Plan partially applied.
    #[error(transparent)]
    PartialApply(#[from] PartialApplyError),
    /// The lock file could not be read or violates its invariants.
    #[error("lock file is invalid: {0}")]
    LockFile(String),
    /// The lock is stale and may not be regenerated.
    #[error("lock is {0} and `sync.frozen` is set; run `envops lock` to regenerate it")]
    FrozenLock(&'static str),
    /// Invalid configuration key or value.
    #[error("configuration error: {0}")]
    Config(String),
    /// Project state could not be read or written.
    #[error("{0}")]
    Store(String),
    /// No project state directory was found.
    #[error("no envops project found in {} or any parent; run `envops init`", .0.display())]
    NotInitialized(PathBuf),
    /// The environment is the active one in the calling shell.
    #[error("environment `{0}` is active; deactivate it and try again")]
    EnvironmentActive(String),
    /// The environment did not converge within the configured number of rounds.
    #[error("environment did not converge after {0} round(s)")]
    NotConverged(u32),
    /// Writing command output or running the editor failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn holder_suffix(holder: Option<&str>) -> String {
    holder.map(|h| format!(" ({h})")).unwrap_or_default()
}
