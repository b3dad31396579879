//! Live runtime manager driving the conda executable.
//!
//! Conda packages are installed and removed with `conda install`/`conda
//! remove`; pip packages with `pip` inside the environment via `conda run`.
//! Each group is applied in one call; when that call fails, its items are
//! retried one at a time so the failure is attributed to the right package.

use std::io::Write as _;
use std::sync::Arc;

use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{conda_diagnostic, split_pip_spec};
use crate::error::PortError;
use crate::ports::{
    ChangeKind, ChangeSet, InstalledPackage, ItemOutcome, PortFuture, RuntimeManager,
    ShellExecutor, ShellOutput,
};
use crate::reference::{Manager, PackageKey};

/// Conda's channel label for packages installed by pip.
const PIP_CHANNEL: &str = "pypi";

/// Runtime manager invoking `conda_exe` through a [`ShellExecutor`].
pub struct LiveCondaRuntime {
    shell: Arc<dyn ShellExecutor>,
    conda_exe: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    CondaInstall,
    PipInstall,
    CondaRemove,
    PipRemove,
}

impl Op {
    fn kind(self) -> ChangeKind {
        match self {
            Op::CondaInstall | Op::PipInstall => ChangeKind::Install,
            Op::CondaRemove | Op::PipRemove => ChangeKind::Remove,
        }
    }
}

#[derive(Deserialize)]
struct ListedPackage {
    name: String,
    version: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    build_string: Option<String>,
}

fn parse_listing(stdout: &str) -> Result<Vec<InstalledPackage>, serde_json::Error> {
    let listed: Vec<ListedPackage> = serde_json::from_str(stdout)?;
    Ok(listed
        .into_iter()
        .map(|p| {
            let pip = p.channel.as_deref() == Some(PIP_CHANNEL);
            InstalledPackage {
                manager: if pip { Manager::Pip } else { Manager::Conda },
                name: p.name,
                version: p.version,
                channel: if pip { None } else { p.channel },
                build: if pip { None } else { p.build_string },
            }
        })
        .collect())
}

fn is_missing_environment(output: &ShellOutput) -> bool {
    output.stdout.contains("EnvironmentLocationNotFound")
        || output.stderr.contains("EnvironmentLocationNotFound")
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

impl LiveCondaRuntime {
    /// Creates a runtime manager invoking `conda_exe` through `shell`.
    pub fn new(shell: Arc<dyn ShellExecutor>, conda_exe: &str) -> Self {
        Self { shell, conda_exe: conda_exe.to_string() }
    }

    /// Runs one group operation over `specs`.
    async fn run_op(&self, env: &str, op: Op, specs: &[String]) -> Result<ShellOutput, PortError> {
        let mut requirements_file = None;
        let args = match op {
            Op::CondaInstall => {
                let mut args = strings(&["install", "--name", env, "--yes", "--json", "--no-deps"]);
                args.extend(specs.iter().cloned());
                args
            }
            Op::CondaRemove => {
                let mut args = strings(&["remove", "--name", env, "--yes", "--json", "--force"]);
                args.extend(specs.iter().cloned());
                args
            }
            Op::PipInstall => {
                // Hash options are only accepted inside a requirements file.
                let mut file = NamedTempFile::new()?;
                for spec in specs {
                    writeln!(file, "{}", split_pip_spec(spec).join(" "))?;
                }
                let mut args = strings(&[
                    "run", "--name", env, "python", "-m", "pip", "install", "--no-deps", "-r",
                ]);
                args.push(file.path().to_string_lossy().into_owned());
                requirements_file = Some(file);
                args
            }
            Op::PipRemove => {
                let mut args = strings(&["run", "--name", env, "python", "-m", "pip", "uninstall"]);
                args.push("--yes".into());
                args.extend(specs.iter().cloned());
                args
            }
        };
        let output = self.shell.run(&self.conda_exe, &args).await;
        drop(requirements_file);
        output
    }

    /// Applies one group, retrying item by item when the group call fails.
    async fn apply_group(
        &self,
        env: &str,
        op: Op,
        items: Vec<(PackageKey, String)>,
    ) -> Result<Vec<ItemOutcome>, PortError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let kind = op.kind();
        let specs: Vec<String> = items.iter().map(|(_, s)| s.clone()).collect();
        let output = self.run_op(env, op, &specs).await?;
        if output.success() {
            debug!(?op, items = items.len(), "group applied");
            return Ok(items
                .into_iter()
                .map(|(key, _)| ItemOutcome { key, kind, error: None })
                .collect());
        }
        if items.len() == 1 {
            let error = Some(conda_diagnostic(&output));
            return Ok(items
                .into_iter()
                .map(|(key, _)| ItemOutcome { key, kind, error: error.clone() })
                .collect());
        }

        warn!(?op, error = %conda_diagnostic(&output), "group failed; retrying per item");
        let mut outcomes = Vec::with_capacity(items.len());
        for (key, spec) in items {
            let output = self.run_op(env, op, std::slice::from_ref(&spec)).await?;
            let error = (!output.success()).then(|| conda_diagnostic(&output));
            outcomes.push(ItemOutcome { key, kind, error });
        }
        Ok(outcomes)
    }
}

impl RuntimeManager for LiveCondaRuntime {
    fn list_installed<'a>(
        &'a self,
        env: &'a str,
    ) -> PortFuture<'a, Option<Vec<InstalledPackage>>> {
        Box::pin(async move {
            let args = strings(&["list", "--name", env, "--json"]);
            let output = self.shell.run(&self.conda_exe, &args).await?;
            if !output.success() {
                if is_missing_environment(&output) {
                    return Ok(None);
                }
                return Err(conda_diagnostic(&output).into());
            }
            let packages = parse_listing(&output.stdout)
                .map_err(|e| format!("unreadable conda listing: {e}"))?;
            Ok(Some(packages))
        })
    }

    fn create_environment<'a>(&'a self, env: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let args = strings(&["create", "--name", env, "--yes", "--json"]);
            let output = self.shell.run(&self.conda_exe, &args).await?;
            if output.success() {
                Ok(())
            } else {
                Err(conda_diagnostic(&output).into())
            }
        })
    }

    fn delete_environment<'a>(&'a self, env: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let args = strings(&["remove", "--name", env, "--all", "--yes", "--json"]);
            let output = self.shell.run(&self.conda_exe, &args).await?;
            if output.success() {
                Ok(())
            } else {
                Err(conda_diagnostic(&output).into())
            }
        })
    }

    fn apply<'a>(
        &'a self,
        env: &'a str,
        changes: &'a ChangeSet,
    ) -> PortFuture<'a, Vec<ItemOutcome>> {
        Box::pin(async move {
            let installs = |manager: Manager| -> Vec<(PackageKey, String)> {
                changes
                    .install
                    .iter()
                    .filter(|i| i.manager == manager)
                    .map(|i| (PackageKey::new(i.manager, &i.name), i.spec.clone()))
                    .collect()
            };
            let removals = |manager: Manager| -> Vec<(PackageKey, String)> {
                changes
                    .remove
                    .iter()
                    .filter(|k| k.manager == manager)
                    .map(|k| (k.clone(), k.name.clone()))
                    .collect()
            };

            // Pip packages sit on top of conda ones: remove them first and
            // install them last.
            let mut outcomes = Vec::new();
            outcomes.extend(self.apply_group(env, Op::PipRemove, removals(Manager::Pip)).await?);
            outcomes
                .extend(self.apply_group(env, Op::CondaRemove, removals(Manager::Conda)).await?);
            outcomes
                .extend(self.apply_group(env, Op::CondaInstall, installs(Manager::Conda)).await?);
            outcomes.extend(self.apply_group(env, Op::PipInstall, installs(Manager::Pip)).await?);
            Ok(outcomes)
        })
    }
}
