//! `envops config get|set|list` commands.

use std::io::Write;
use std::path::Path;

use super::holder;
use crate::context::ServiceContext;
use crate::error::OpsError;
use crate::store::ProjectStore;

/// Execute `config get`.
///
/// # Errors
///
/// Returns [`OpsError::Config`] for an unknown key.
pub fn get(
    ctx: &ServiceContext,
    root: &Path,
    key: &str,
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    writeln!(out, "{}", store.load_config()?.get(key)?)?;
    Ok(())
}

/// Execute `config set`.
///
/// # Errors
///
/// Returns [`OpsError::Config`] for an unknown key or a value of the wrong
/// type; the stored configuration is left unchanged.
pub fn set(
    ctx: &ServiceContext,
    root: &Path,
    key: &str,
    value: &str,
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let _guard = store.lock_state(&holder(ctx, "config set"))?;
    let mut config = store.load_config()?;
    config.set(key, value)?;
    store.save_config(&config)?;
    writeln!(out, "{key} = {}", config.get(key)?)?;
    Ok(())
}

/// Execute `config list`.
///
/// # Errors
///
/// Returns [`OpsError::Config`] if the stored configuration is malformed.
pub fn list(ctx: &ServiceContext, root: &Path, out: &mut dyn Write) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    for (key, value) in store.load_config()?.list()? {
        writeln!(out, "{key} = {value}")?;
    }
    Ok(())
}
