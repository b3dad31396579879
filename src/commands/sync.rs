//! `envops sync`, `install`, and `uninstall` commands.

use std::io::Write;
use std::path::Path;

use super::reqs::{add_to_store, parse_specs, remove_from_store};
use super::{block_on, holder};
use crate::cli::AddArgs;
use crate::config::ProjectConfig;
use crate::context::ServiceContext;
use crate::error::OpsError;
use crate::plan::plan;
use crate::report::{format_applied, format_plan, format_report};
use crate::store::ProjectStore;
use crate::sync::{observe, sync, SyncOutcome};

/// Execute the `sync` command.
///
/// With `dry_run`, prints the current drift and the first plan without
/// taking the state lock or changing anything.
///
/// # Errors
///
/// Returns solve, runtime, and store errors, [`OpsError::PartialApply`]
/// when some items failed, and [`OpsError::NotConverged`] when drift
/// remains after `sync.max_rounds` plans.
pub fn run(
    ctx: &ServiceContext,
    root: &Path,
    dry_run: bool,
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);

    if dry_run {
        let config = store.load_config()?;
        let observation = block_on(observe(ctx, &store, &config))?;
        let report = observation.classify();
        writeln!(out, "{}", format_report(&report, observation.environment_exists))?;
        writeln!(out)?;
        writeln!(out, "Plan:")?;
        if !observation.environment_exists {
            writeln!(out, "  CREATE environment `{}`", config.env_name)?;
        }
        writeln!(out, "{}", format_plan(&plan(&report, &config)))?;
        return Ok(());
    }

    let _guard = store.lock_state(&holder(ctx, "sync"))?;
    reconcile(ctx, &store, out)
}

/// Execute the `install` command: add the specs, then sync.
///
/// # Errors
///
/// Returns parse errors for bad specs, then anything `sync` returns.
pub fn install(
    ctx: &ServiceContext,
    root: &Path,
    args: &AddArgs,
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    let refs = parse_specs(args)?;
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let _guard = store.lock_state(&holder(ctx, "install"))?;
    add_to_store(&store, refs, out)?;
    reconcile(ctx, &store, out)
}

/// Execute the `uninstall` command: remove the names, then sync.
///
/// # Errors
///
/// Returns anything `sync` returns.
pub fn uninstall(
    ctx: &ServiceContext,
    root: &Path,
    names: &[String],
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let _guard = store.lock_state(&holder(ctx, "uninstall"))?;
    remove_from_store(&store, names, out)?;
    reconcile(ctx, &store, out)
}

/// Loads the configuration and runs the sync loop; callers hold the state
/// lock.
fn reconcile(
    ctx: &ServiceContext,
    store: &ProjectStore<'_>,
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    let config = store.load_config()?;
    let outcome = block_on(sync(ctx, store, &config))?;
    write_outcome(store, &config, outcome, out)
}

/// Prints what a sync did and the final drift, failing when drift remains.
pub(super) fn write_outcome(
    store: &ProjectStore<'_>,
    config: &ProjectConfig,
    outcome: SyncOutcome,
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    if outcome.created_environment {
        writeln!(out, "Created environment `{}`.", config.env_name)?;
    }
    if outcome.lock_regenerated {
        writeln!(out, "Wrote {}.", store.lock_path().display())?;
    }
    if !outcome.applied.is_empty() {
        writeln!(out, "{}", format_applied(&outcome.applied))?;
    }
    writeln!(out, "{}", format_report(&outcome.report, true))?;
    outcome.into_result(config.sync.max_rounds).map(|_| ())
}
