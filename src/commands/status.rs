//! `envops status` command.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use super::block_on;
use crate::context::ServiceContext;
use crate::drift::DriftReport;
use crate::error::OpsError;
use crate::report::format_report;
use crate::store::ProjectStore;
use crate::sync::observe;

#[derive(Serialize)]
struct StatusJson<'a> {
    env_name: &'a str,
    environment_exists: bool,
    in_sync: bool,
    #[serde(flatten)]
    report: &'a DriftReport,
    warnings: Vec<String>,
}

/// Execute the `status` command.
///
/// Reads requirements, lock, and environment without changing any of
/// them, and prints the three comparisons with every drifting package.
///
/// # Errors
///
/// Returns store and parse errors, or [`OpsError::RuntimeQuery`] when the
/// runtime cannot be queried.
pub fn run(
    ctx: &ServiceContext,
    root: &Path,
    json: bool,
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let config = store.load_config()?;
    let observation = block_on(observe(ctx, &store, &config))?;
    let report = observation.classify();

    let mut warnings = observation.requirements.check(&config.env_name);
    if let Some(lock) = &observation.lock {
        warnings.extend(lock.integrity_warnings());
    }

    if json {
        let status = StatusJson {
            env_name: &config.env_name,
            environment_exists: observation.environment_exists,
            in_sync: report.is_in_sync(),
            report: &report,
            warnings,
        };
        serde_json::to_writer_pretty(&mut *out, &status).map_err(std::io::Error::from)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "environment: {}", config.env_name)?;
    writeln!(out, "{}", format_report(&report, observation.environment_exists))?;
    if !warnings.is_empty() {
        writeln!(out)?;
        for warning in &warnings {
            writeln!(out, "warning: {warning}")?;
        }
    }
    Ok(())
}
