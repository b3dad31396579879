//! Live view of the installed environment.
//!
//! A snapshot is transient: it is captured on demand from the runtime
//! manager, never persisted, and never used to mutate the environment.

use std::time::Duration;

use tracing::debug;

use crate::context::ServiceContext;
use crate::error::RuntimeQueryError;
use crate::ports::InstalledPackage;

/// Installed packages of one environment at one point in time.
///
/// Entries are kept as reported; the same `(manager, name)` may appear more
/// than once when the runtime reports it under two channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    /// Environment the snapshot was taken from.
    pub env_name: String,
    /// Installed packages.
    pub packages: Vec<InstalledPackage>,
}

impl EnvironmentSnapshot {
    /// An environment with nothing installed.
    #[must_use]
    pub fn empty(env_name: &str) -> Self {
        Self { env_name: env_name.to_string(), packages: Vec::new() }
    }
}

/// Queries the runtime manager for the installed package set of `env_name`.
///
/// # Errors
///
/// Returns [`RuntimeQueryError::EnvironmentNotFound`] when the environment
/// does not exist, [`RuntimeQueryError::TimedOut`] after `timeout_secs`,
/// and [`RuntimeQueryError::Unavailable`] when the runtime cannot be
/// reached.
pub async fn capture(
    ctx: &ServiceContext,
    env_name: &str,
    timeout_secs: u64,
) -> Result<EnvironmentSnapshot, RuntimeQueryError> {
    let query = ctx.runtime.list_installed(env_name);
    let listed = tokio::time::timeout(Duration::from_secs(timeout_secs), query)
        .await
        .map_err(|_| RuntimeQueryError::TimedOut(timeout_secs))?
        .map_err(|e| RuntimeQueryError::Unavailable(e.to_string()))?;
    let packages =
        listed.ok_or_else(|| RuntimeQueryError::EnvironmentNotFound(env_name.to_string()))?;
    debug!(env = env_name, packages = packages.len(), "captured environment snapshot");
    Ok(EnvironmentSnapshot { env_name: env_name.to_string(), packages })
}
