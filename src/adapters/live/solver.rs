//! Live solver: conda and pip dry runs.
//!
//! Conda specs are solved with `conda create --dry-run --json` against a
//! scratch prefix that is never created. Pip specs are solved with
//! `pip install --dry-run --report -`, run through `conda run` in the base
//! environment. Neither touches the managed environment.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::{conda_diagnostic, split_pip_spec};
use crate::ports::{
    PackageSolver, PortFuture, ResolvedPackage, ShellExecutor, SolveRequest, SolveResponse,
};
use crate::reference::Manager;

/// Solves through the conda executable.
pub struct LiveCondaSolver {
    shell: Arc<dyn ShellExecutor>,
    conda_exe: String,
}

impl LiveCondaSolver {
    /// Creates a solver invoking `conda_exe` through `shell`.
    pub fn new(shell: Arc<dyn ShellExecutor>, conda_exe: &str) -> Self {
        Self { shell, conda_exe: conda_exe.to_string() }
    }

    fn conda_args(request: &SolveRequest, scratch: &str) -> Vec<String> {
        let mut args: Vec<String> = ["create", "--prefix", scratch, "--dry-run", "--json"]
            .iter()
            .map(ToString::to_string)
            .collect();
        args.push("--override-channels".into());
        for channel in &request.channels {
            args.push("-c".into());
            args.push(channel.clone());
        }
        args.push("--solver".into());
        args.push(request.settings.solver.clone());
        match request.settings.channel_priority.as_str() {
            "strict" => args.push("--strict-channel-priority".into()),
            "disabled" => args.push("--no-channel-priority".into()),
            _ => {}
        }
        args.extend(request.conda_specs.iter().cloned());
        args
    }

    fn pip_args(request: &SolveRequest) -> Vec<String> {
        let mut args: Vec<String> =
            ["run", "--name", "base", "python", "-m", "pip", "install", "--dry-run"]
                .iter()
                .map(ToString::to_string)
                .collect();
        args.extend(
            ["--ignore-installed", "--quiet", "--report", "-"].iter().map(ToString::to_string),
        );
        args.extend(request.pip_specs.iter().flat_map(|s| split_pip_spec(s)));
        args
    }
}

#[derive(Deserialize)]
struct CondaDryRun {
    #[serde(default)]
    actions: CondaActions,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct CondaActions {
    #[serde(default)]
    link: Vec<CondaLink>,
    #[serde(default)]
    fetch: Vec<CondaFetch>,
}

#[derive(Deserialize)]
struct CondaLink {
    name: String,
    version: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    build_string: Option<String>,
}

#[derive(Deserialize)]
struct CondaFetch {
    name: String,
    url: String,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    md5: Option<String>,
}

fn parse_conda_solution(stdout: &str) -> Result<Vec<ResolvedPackage>, serde_json::Error> {
    let run: CondaDryRun = serde_json::from_str(stdout)?;
    let fetch = run.actions.fetch;
    Ok(run
        .actions
        .link
        .into_iter()
        .map(|link| {
            let fetched = fetch.iter().find(|f| f.name == link.name);
            let hash = fetched.and_then(|f| {
                f.sha256
                    .as_ref()
                    .map(|h| format!("sha256:{h}"))
                    .or_else(|| f.md5.as_ref().map(|h| format!("md5:{h}")))
            });
            ResolvedPackage {
                manager: Manager::Conda,
                name: link.name,
                version: link.version,
                channel: link.channel,
                build: link.build_string,
                url: fetched.map(|f| f.url.clone()),
                hash,
            }
        })
        .collect())
}

#[derive(Deserialize)]
struct PipReport {
    install: Vec<PipInstall>,
}

#[derive(Deserialize)]
struct PipInstall {
    metadata: PipMetadata,
    #[serde(default)]
    download_info: Option<PipDownload>,
}

#[derive(Deserialize)]
struct PipMetadata {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct PipDownload {
    url: String,
    #[serde(default)]
    archive_info: Option<PipArchive>,
}

#[derive(Deserialize)]
struct PipArchive {
    #[serde(default)]
    hash: Option<String>,
}

fn parse_pip_report(stdout: &str) -> Result<Vec<ResolvedPackage>, serde_json::Error> {
    let report: PipReport = serde_json::from_str(stdout)?;
    Ok(report
        .install
        .into_iter()
        .map(|item| {
            let (url, hash) = match item.download_info {
                Some(info) => {
                    let hash = info
                        .archive_info
                        .and_then(|a| a.hash)
                        .map(|h| h.replacen('=', ":", 1));
                    (Some(info.url), hash)
                }
                None => (None, None),
            };
            ResolvedPackage {
                manager: Manager::Pip,
                name: item.metadata.name,
                version: item.metadata.version,
                channel: None,
                build: None,
                url,
                hash,
            }
        })
        .collect())
}

impl PackageSolver for LiveCondaSolver {
    fn solve<'a>(&'a self, request: &'a SolveRequest) -> PortFuture<'a, SolveResponse> {
        Box::pin(async move {
            let mut packages = Vec::new();

            if !request.conda_specs.is_empty() {
                let scratch = tempfile::tempdir()?;
                let prefix = scratch.path().join("solve");
                let args = Self::conda_args(request, &prefix.to_string_lossy());
                let output = self.shell.run(&self.conda_exe, &args).await?;
                if !output.success() {
                    return Err(conda_diagnostic(&output).into());
                }
                let solved = parse_conda_solution(&output.stdout)
                    .map_err(|e| format!("unreadable conda solution: {e}"))?;
                debug!(packages = solved.len(), "conda solve finished");
                packages.extend(solved);
            }

            if !request.pip_specs.is_empty() {
                let output = self.shell.run(&self.conda_exe, &Self::pip_args(request)).await?;
                if !output.success() {
                    return Err(conda_diagnostic(&output).into());
                }
                let solved = parse_pip_report(&output.stdout)
                    .map_err(|e| format!("unreadable pip report: {e}"))?;
                debug!(packages = solved.len(), "pip solve finished");
                packages.extend(solved);
            }

            Ok(SolveResponse { packages })
        })
    }
}
