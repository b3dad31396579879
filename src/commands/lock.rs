//! `envops lock` command.

use std::io::Write;
use std::path::Path;

use super::{block_on, holder};
use crate::context::ServiceContext;
use crate::error::OpsError;
use crate::lock::generate;
use crate::store::ProjectStore;

/// Execute the `lock` command: solve the requirements and write a new lock,
/// whether or not the current one is stale. Honors no frozen setting; this
/// is the explicit way to refresh a frozen project.
///
/// # Errors
///
/// Returns [`OpsError::Solve`] when the solver fails; the old lock is kept.
pub fn run(ctx: &ServiceContext, root: &Path, out: &mut dyn Write) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let _guard = store.lock_state(&holder(ctx, "lock"))?;
    let config = store.load_config()?;
    let requirements = store.load_requirements()?;

    let lock = block_on(generate(&requirements, ctx, &config))?;
    store.save_lock(&lock)?;
    writeln!(
        out,
        "Locked {} package(s) into {}.",
        lock.entries().len(),
        store.lock_path().display()
    )?;
    for warning in lock.integrity_warnings() {
        writeln!(out, "warning: {warning}")?;
    }
    Ok(())
}
