//! In-memory port doubles shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};

use crate::cassette::config::CassetteConfig;
use crate::context::ServiceContext;
use crate::error::PortError;
use crate::ports::{
    ChangeKind, ChangeSet, Clock, FileSystem, InstalledPackage, ItemOutcome, PackageSolver,
    PortFuture, ResolvedPackage, RuntimeManager, ShellExecutor, ShellOutput, SolveRequest,
    SolveResponse,
};
use crate::reference::Manager;

/// In-memory filesystem.
#[derive(Default)]
pub(crate) struct MemFs {
    files: Mutex<HashMap<PathBuf, String>>,
}

impl FileSystem for MemFs {
    fn read_to_string(&self, path: &Path) -> Result<String, PortError> {
        let files = self.files.lock().unwrap();
        files.get(path).cloned().ok_or_else(|| format!("file not found: {}", path.display()).into())
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), PortError> {
        let mut files = self.files.lock().unwrap();
        files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        files.keys().any(|k| k.starts_with(path))
    }

    fn create_dir_all(&self, _path: &Path) -> Result<(), PortError> {
        Ok(())
    }
}

/// Clock frozen at 2024-05-01T12:00:00Z.
pub(crate) struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }
}

/// Solver returning a fixed package set, or a fixed diagnostic.
pub(crate) struct FakeSolver {
    pub(crate) packages: Vec<ResolvedPackage>,
    pub(crate) error: Option<String>,
    pub(crate) requests: Arc<Mutex<Vec<SolveRequest>>>,
}

impl FakeSolver {
    pub(crate) fn solving(packages: Vec<ResolvedPackage>) -> Self {
        Self { packages, error: None, requests: Arc::default() }
    }

    pub(crate) fn failing(diagnostic: &str) -> Self {
        Self { packages: Vec::new(), error: Some(diagnostic.to_string()), requests: Arc::default() }
    }
}

impl PackageSolver for FakeSolver {
    fn solve<'a>(&'a self, request: &'a SolveRequest) -> PortFuture<'a, SolveResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let result = match &self.error {
            Some(e) => Err(e.clone().into()),
            None => Ok(SolveResponse { packages: self.packages.clone() }),
        };
        Box::pin(async move { result })
    }
}

/// Solver that never answers.
pub(crate) struct StalledSolver;

impl PackageSolver for StalledSolver {
    fn solve<'a>(&'a self, _request: &'a SolveRequest) -> PortFuture<'a, SolveResponse> {
        Box::pin(std::future::pending())
    }
}

/// Runtime keeping installed packages in memory; `None` means the
/// environment does not exist. Names in `failing` fail to install.
#[derive(Clone, Default)]
pub(crate) struct FakeRuntime {
    pub(crate) installed: Arc<Mutex<Option<Vec<InstalledPackage>>>>,
    pub(crate) failing: Vec<String>,
}

impl FakeRuntime {
    pub(crate) fn with(packages: Vec<InstalledPackage>) -> Self {
        Self { installed: Arc::new(Mutex::new(Some(packages))), failing: Vec::new() }
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let installed = self.installed.lock().unwrap();
        let mut names: Vec<String> =
            installed.iter().flatten().map(|p| format!("{}={}", p.name, p.version)).collect();
        names.sort();
        names
    }
}

impl RuntimeManager for FakeRuntime {
    fn list_installed<'a>(
        &'a self,
        _env: &'a str,
    ) -> PortFuture<'a, Option<Vec<InstalledPackage>>> {
        let listed = self.installed.lock().unwrap().clone();
        Box::pin(async move { Ok(listed) })
    }

    fn create_environment<'a>(&'a self, _env: &'a str) -> PortFuture<'a, ()> {
        self.installed.lock().unwrap().get_or_insert_with(Vec::new);
        Box::pin(async { Ok(()) })
    }

    fn delete_environment<'a>(&'a self, _env: &'a str) -> PortFuture<'a, ()> {
        let existed = self.installed.lock().unwrap().take().is_some();
        Box::pin(async move {
            if existed {
                Ok(())
            } else {
                Err("environment does not exist".into())
            }
        })
    }

    fn apply<'a>(
        &'a self,
        _env: &'a str,
        changes: &'a ChangeSet,
    ) -> PortFuture<'a, Vec<ItemOutcome>> {
        let mut outcomes = Vec::new();
        let mut guard = self.installed.lock().unwrap();
        let installed = guard.get_or_insert_with(Vec::new);
        for item in &changes.install {
            let key = crate::reference::PackageKey::new(item.manager, &item.name);
            if self.failing.contains(&item.name) {
                outcomes.push(ItemOutcome {
                    key,
                    kind: ChangeKind::Install,
                    error: Some("conflicting files".into()),
                });
                continue;
            }
            installed.retain(|p| p.key() != key);
            installed.push(InstalledPackage {
                manager: item.manager,
                name: item.name.clone(),
                version: item.version.clone(),
                channel: (item.manager == Manager::Conda).then(|| "defaults".to_string()),
                build: None,
            });
            outcomes.push(ItemOutcome { key, kind: ChangeKind::Install, error: None });
        }
        for key in &changes.remove {
            installed.retain(|p| &p.key() != key);
            outcomes.push(ItemOutcome { key: key.clone(), kind: ChangeKind::Remove, error: None });
        }
        Box::pin(async move { Ok(outcomes) })
    }
}

/// Runtime whose listing never answers.
pub(crate) struct StalledRuntime;

impl RuntimeManager for StalledRuntime {
    fn list_installed<'a>(
        &'a self,
        _env: &'a str,
    ) -> PortFuture<'a, Option<Vec<InstalledPackage>>> {
        Box::pin(std::future::pending())
    }

    fn create_environment<'a>(&'a self, _env: &'a str) -> PortFuture<'a, ()> {
        Box::pin(std::future::pending())
    }

    fn delete_environment<'a>(&'a self, _env: &'a str) -> PortFuture<'a, ()> {
        Box::pin(std::future::pending())
    }

    fn apply<'a>(
        &'a self,
        _env: &'a str,
        _changes: &'a ChangeSet,
    ) -> PortFuture<'a, Vec<ItemOutcome>> {
        Box::pin(std::future::pending())
    }
}

/// Shell answering with scripted outputs in order and recording each
/// command line.
pub(crate) struct ScriptedShell {
    outputs: Mutex<VecDeque<ShellOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedShell {
    pub(crate) fn new(outputs: Vec<ShellOutput>) -> Self {
        Self { outputs: Mutex::new(outputs.into()), calls: Mutex::default() }
    }

    /// Command lines run so far, as `program arg arg ...`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ShellExecutor for ScriptedShell {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> PortFuture<'a, ShellOutput> {
        let mut line = vec![program.to_string()];
        line.extend(args.iter().cloned());
        self.calls.lock().unwrap().push(line.join(" "));
        let next = self.outputs.lock().unwrap().pop_front();
        Box::pin(async move { next.ok_or_else(|| "no scripted output left".into()) })
    }
}

/// A resolved conda package from `defaults`.
pub(crate) fn conda(name: &str, version: &str) -> ResolvedPackage {
    ResolvedPackage {
        manager: Manager::Conda,
        name: name.to_string(),
        version: version.to_string(),
        channel: Some("defaults".to_string()),
        build: Some("0".to_string()),
        url: Some(format!("https://repo.example/{name}-{version}-0.conda")),
        hash: Some("sha256:00ff".to_string()),
    }
}

/// A resolved pip package installed from `url`, without a hash.
pub(crate) fn pip(name: &str, version: &str, url: &str) -> ResolvedPackage {
    ResolvedPackage {
        manager: Manager::Pip,
        name: name.to_string(),
        version: version.to_string(),
        channel: None,
        build: None,
        url: Some(url.to_string()),
        hash: None,
    }
}

/// An installed conda package from `defaults`.
pub(crate) fn installed(name: &str, version: &str) -> InstalledPackage {
    InstalledPackage {
        manager: Manager::Conda,
        name: name.to_string(),
        version: version.to_string(),
        channel: Some("defaults".to_string()),
        build: None,
    }
}

/// Context with in-memory filesystem, fixed clock, and the given solver and
/// runtime; the package index is left unconfigured.
pub(crate) fn context(solver: FakeSolver, runtime: FakeRuntime) -> ServiceContext {
    let mut ctx = ServiceContext::replaying_from(&CassetteConfig::panic_on_unspecified())
        .expect("panic config should always succeed");
    ctx.fs = Box::new(MemFs::default());
    ctx.clock = Box::new(FixedClock);
    ctx.solver = Box::new(solver);
    ctx.runtime = Box::new(runtime);
    ctx
}
