//! Requirements commands: `add`, `remove`, and `reqs list|edit|check`.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::process::Command as Process;

use tracing::debug;

use super::holder;
use crate::cli::AddArgs;
use crate::context::ServiceContext;
use crate::error::{OpsError, ParseError};
use crate::reference::{normalize_name, Manager, PackageReference, DEFAULT_CHANNEL};
use crate::requirements::RequirementsDocument;
use crate::store::ProjectStore;

/// Parses command-line specs into references.
///
/// Arguments holding several whitespace-separated specs are split. Pip
/// shorthand `pkg=1.0` means `pkg==1.0`. Editable paths become `-e`
/// references.
///
/// # Errors
///
/// Returns [`ParseError::InvalidReference`] for a malformed spec and
/// [`ParseError::DuplicatePackage`] when one package is named twice.
pub fn parse_specs(args: &AddArgs) -> Result<Vec<PackageReference>, ParseError> {
    let channel = args.channel.as_deref().unwrap_or(DEFAULT_CHANNEL);
    let mut refs = Vec::new();
    for token in args.specs.iter().flat_map(|s| s.split_whitespace()) {
        refs.push(if args.pip {
            PackageReference::parse_pip(token)?
        } else {
            PackageReference::parse_conda(token, channel)?
        });
    }
    for path in &args.editable {
        refs.push(PackageReference::parse_pip(&format!("-e {path}"))?);
    }

    let mut seen = HashSet::new();
    for reference in &refs {
        let name = normalize_name(Manager::Pip, reference.name());
        if !seen.insert(name.clone()) {
            return Err(ParseError::DuplicatePackage(name));
        }
    }
    Ok(refs)
}

/// Adds `refs` to the stored requirements and saves them. The caller holds
/// the state lock.
pub(crate) fn add_to_store(
    store: &ProjectStore<'_>,
    refs: Vec<PackageReference>,
    out: &mut dyn Write,
) -> Result<RequirementsDocument, OpsError> {
    let mut requirements = store.load_requirements()?;
    for reference in &refs {
        writeln!(out, "Adding {reference}")?;
    }
    requirements.add(refs);
    store.save_requirements(&requirements)?;
    Ok(requirements)
}

/// Removes `names` from the stored requirements and saves them. The caller
/// holds the state lock.
pub(crate) fn remove_from_store(
    store: &ProjectStore<'_>,
    names: &[String],
    out: &mut dyn Write,
) -> Result<RequirementsDocument, OpsError> {
    let mut requirements = store.load_requirements()?;
    let removed = requirements.remove(names);
    if removed.is_empty() {
        writeln!(out, "No matching requirements; nothing removed.")?;
        return Ok(requirements);
    }
    for reference in &removed {
        writeln!(out, "Removing {reference}")?;
    }
    store.save_requirements(&requirements)?;
    Ok(requirements)
}

/// Execute the `add` command.
///
/// # Errors
///
/// Returns parse errors for bad specs, [`OpsError::ConcurrentAccess`] when
/// another invocation holds the project, and store errors.
pub fn add(
    ctx: &ServiceContext,
    root: &Path,
    args: &AddArgs,
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    let refs = parse_specs(args)?;
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let _guard = store.lock_state(&holder(ctx, "add"))?;
    add_to_store(&store, refs, out)?;
    writeln!(out, "Run `envops sync` to update the lock and environment.")?;
    Ok(())
}

/// Execute the `remove` command.
///
/// # Errors
///
/// Returns [`OpsError::ConcurrentAccess`] when another invocation holds the
/// project, and store errors.
pub fn remove(
    ctx: &ServiceContext,
    root: &Path,
    names: &[String],
    out: &mut dyn Write,
) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let _guard = store.lock_state(&holder(ctx, "remove"))?;
    remove_from_store(&store, names, out)?;
    Ok(())
}

/// Execute `reqs list`: print the requirements document as stored.
///
/// # Errors
///
/// Returns a store error if the document cannot be read.
pub fn list(ctx: &ServiceContext, root: &Path, out: &mut dyn Write) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    write!(out, "{}", store.read_requirements_raw()?)?;
    Ok(())
}

/// Execute `reqs check`: parse, validate, and print warnings.
///
/// # Errors
///
/// Returns the parse error when the document is invalid.
pub fn check(ctx: &ServiceContext, root: &Path, out: &mut dyn Write) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let config = store.load_config()?;
    let requirements = store.load_requirements()?;
    let warnings = requirements.check(&config.env_name);
    for warning in &warnings {
        writeln!(out, "warning: {warning}")?;
    }
    writeln!(
        out,
        "Requirements are valid: {} conda and {} pip package(s).",
        requirements.conda().len(),
        requirements.pip().len()
    )?;
    Ok(())
}

/// Execute `reqs edit`: open the document in `$VISUAL`, `$EDITOR`, or `vi`,
/// then validate what was saved.
///
/// # Errors
///
/// Returns an I/O error if the editor cannot be started or fails, and the
/// parse error when the edited document is invalid.
pub fn edit(ctx: &ServiceContext, root: &Path, out: &mut dyn Write) -> Result<(), OpsError> {
    let store = ProjectStore::new(ctx.fs.as_ref(), root);
    let _guard = store.lock_state(&holder(ctx, "reqs edit"))?;
    let path = store.requirements_path();

    let editor = ["VISUAL", "EDITOR"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| "vi".to_string());
    let mut parts = editor.split_whitespace();
    let program = parts.next().unwrap_or("vi");
    debug!(editor = %editor, path = %path.display(), "opening editor");
    let status = Process::new(program).args(parts).arg(&path).status()?;
    if !status.success() {
        return Err(OpsError::Store(format!("editor `{editor}` exited with {status}")));
    }

    match store.load_requirements() {
        Ok(_) => {
            writeln!(out, "Requirements are valid.")?;
            Ok(())
        }
        Err(e) => {
            writeln!(out, "The edited requirements are invalid; fix them with `envops reqs edit`.")?;
            Err(e)
        }
    }
}
