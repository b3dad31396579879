//! `envops delete` and `clean` commands.

use std::env;
use std::io::Write;
use std::path::Path;

use super::sync::write_outcome;
use super::{block_on, holder};
use crate::context::ServiceContext;
use crate::error::OpsError;
use crate::store::ProjectStore;
use crate::sync::{delete_environment, rebuild};

/// Execute the `delete` command: remove the managed environment. Requirements
/// and lock are left alone.
///
/// # Errors
///
/// Returns [`OpsError::EnvironmentActive`] when the environment is active in
/// the calling shell, and runtime errors when deletion fails.
pub fn delete(ctx: &ServiceContext, root: &Path, out: &mut dyn Write) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let _guard = store.lock_state(&holder(ctx, "delete"))?;
    let config = store.load_config()?;
    ensure_inactive(&config.env_name, active_environment().as_deref())?;

    if block_on(delete_environment(ctx, &config))? {
        writeln!(out, "Deleted environment `{}`.", config.env_name)?;
    } else {
        writeln!(out, "Environment `{}` does not exist; nothing to delete.", config.env_name)?;
    }
    Ok(())
}

/// Execute the `clean` command: delete the environment and rebuild it from
/// the lock.
///
/// # Errors
///
/// Returns [`OpsError::EnvironmentActive`] when the environment is active in
/// the calling shell, then anything `sync` returns.
pub fn clean(ctx: &ServiceContext, root: &Path, out: &mut dyn Write) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let _guard = store.lock_state(&holder(ctx, "clean"))?;
    let config = store.load_config()?;
    ensure_inactive(&config.env_name, active_environment().as_deref())?;

    let outcome = block_on(rebuild(ctx, &store, &config))?;
    write_outcome(&store, &config, outcome, out)
}

fn active_environment() -> Option<String> {
    env::var("CONDA_DEFAULT_ENV").ok().filter(|name| !name.is_empty())
}

fn ensure_inactive(env_name: &str, active: Option<&str>) -> Result<(), OpsError> {
    if active == Some(env_name) {
        return Err(OpsError::EnvironmentActive(env_name.to_string()));
    }
    Ok(())
}
