//! `envops init` command.

use std::io::Write;
use std::path::Path;

use super::holder;
use crate::config::ProjectConfig;
use crate::context::ServiceContext;
use crate::error::OpsError;
use crate::requirements::RequirementsDocument;
use crate::store::{default_env_name, ProjectStore};

/// Execute the `init` command.
///
/// Writes a default configuration and requirements document into
/// `.envops/`. An existing project is only overwritten with `force`; its
/// lock is kept and will show as stale.
///
/// # Errors
///
/// Returns [`OpsError::Store`] if the project exists and `force` is not
/// set, and config or store errors otherwise.
pub fn run(
    ctx: &ServiceContext,
    root: &Path,
    name: Option<&str>,
    force: bool,
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    if store.is_initialized() && !force {
        return Err(OpsError::Store(format!(
            "{} already exists; pass --force to reinitialize",
            store.state_dir().display()
        )));
    }

    let env_name = name.map_or_else(|| default_env_name(root), ToString::to_string);
    let config = ProjectConfig::for_env(&env_name);
    config.validate()?;

    let _guard = store.lock_state(&holder(ctx, "init"))?;
    store.init(&config, &RequirementsDocument::create_default(&env_name), true)?;
    writeln!(
        out,
        "Initialized envops project in {} for environment `{env_name}`.",
        store.state_dir().display()
    )?;
    writeln!(out, "Declare packages with `envops add`, then run `envops sync`.")?;
    Ok(())
}
