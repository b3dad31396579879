//! Service context bundling all port trait objects.

use std::path::Path;
use std::sync::Arc;

use crate::adapters::live::clock::LiveClock;
use crate::adapters::live::filesystem::LiveFileSystem;
use crate::adapters::live::index::LivePackageIndex;
use crate::adapters::live::runtime::LiveCondaRuntime;
use crate::adapters::live::shell::LiveShellExecutor;
use crate::adapters::live::solver::LiveCondaSolver;
use crate::adapters::recording::{
    RecordingClock, RecordingPackageIndex, RecordingPackageSolver, RecordingRuntimeManager,
};
use crate::adapters::replaying::{
    ReplayingClock, ReplayingPackageIndex, ReplayingPackageSolver, ReplayingRuntimeManager,
};
use crate::cassette::config::CassetteConfig;
use crate::cassette::format::Cassette;
use crate::cassette::replayer::CassetteReplayer;
use crate::cassette::session::RecordingSession;
use crate::config::ProjectConfig;
use crate::ports::{
    ChangeSet, Clock, FileSystem, InstalledPackage, ItemOutcome, PackageIndex, PackageSolver,
    PortFuture, ReleaseFile, RuntimeManager, ShellExecutor, SolveRequest, SolveResponse,
};

/// Bundles all port trait objects into a single context.
///
/// Constructors wire up live, recording, or replaying adapters. The
/// filesystem is always live: project state files are inputs, not
/// recorded interactions.
pub struct ServiceContext {
    /// Clock for lock timestamps.
    pub clock: Box<dyn Clock>,
    /// Filesystem for project state files.
    pub fs: Box<dyn FileSystem>,
    /// External package-resolution engine.
    pub solver: Box<dyn PackageSolver>,
    /// Runtime manager owning the environment.
    pub runtime: Box<dyn RuntimeManager>,
    /// Package index for pip hash enrichment.
    pub index: Box<dyn PackageIndex>,
}

impl ServiceContext {
    /// Creates a live context; conda and index settings come from `config`.
    #[must_use]
    pub fn live(config: &ProjectConfig) -> Self {
        let shell: Arc<dyn ShellExecutor> = Arc::new(LiveShellExecutor);
        Self {
            clock: Box::new(LiveClock),
            fs: Box::new(LiveFileSystem),
            solver: Box::new(LiveCondaSolver::new(Arc::clone(&shell), &config.runtime.conda_exe)),
            runtime: Box::new(LiveCondaRuntime::new(shell, &config.runtime.conda_exe)),
            index: Box::new(LivePackageIndex::new(&config.pip.index_url)),
        }
    }

    /// Creates a live context whose clock, solver, runtime, and index
    /// interactions are recorded into per-port cassettes under `dir`.
    ///
    /// Drop the context before calling [`RecordingSession::finish`]. This is
    /// the developer-only mechanism behind `ENVOPS_RECORD`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cassette directory cannot be prepared.
    pub fn recording(config: &ProjectConfig, dir: &Path) -> Result<(Self, RecordingSession), String> {
        let session = RecordingSession::new(dir)?;
        let live = Self::live(config);
        let ctx = Self {
            clock: Box::new(RecordingClock::new(live.clock, Arc::clone(&session.clock))),
            fs: live.fs,
            solver: Box::new(RecordingPackageSolver::new(live.solver, Arc::clone(&session.solver))),
            runtime: Box::new(RecordingRuntimeManager::new(
                live.runtime,
                Arc::clone(&session.runtime),
            )),
            index: Box::new(RecordingPackageIndex::new(live.index, Arc::clone(&session.index))),
        };
        Ok((ctx, session))
    }

    /// Creates a replaying context from a single cassette holding every
    /// port's interactions. Each port gets its own cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the cassette file cannot be read or parsed.
    pub fn replaying(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read cassette file {}: {e}", path.display()))?;
        let cassette: Cassette = serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse cassette file {}: {e}", path.display()))?;

        Ok(Self {
            clock: Box::new(ReplayingClock::new(CassetteReplayer::new(&cassette))),
            fs: Box::new(LiveFileSystem),
            solver: Box::new(ReplayingPackageSolver::new(CassetteReplayer::new(&cassette))),
            runtime: Box::new(ReplayingRuntimeManager::new(CassetteReplayer::new(&cassette))),
            index: Box::new(ReplayingPackageIndex::new(CassetteReplayer::new(&cassette))),
        })
    }

    /// Creates a replaying context from per-port cassette files. Ports
    /// without a cassette panic with a clear message when called.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured cassette file cannot be read or parsed.
    pub fn replaying_from(config: &CassetteConfig) -> Result<Self, String> {
        let replayers = config.load_all()?;

        Ok(Self {
            clock: match replayers.clock {
                Some(r) => Box::new(ReplayingClock::new(r)),
                None => Box::new(PanickingClock),
            },
            fs: Box::new(LiveFileSystem),
            solver: match replayers.solver {
                Some(r) => Box::new(ReplayingPackageSolver::new(r)),
                None => Box::new(PanickingSolver),
            },
            runtime: match replayers.runtime {
                Some(r) => Box::new(ReplayingRuntimeManager::new(r)),
                None => Box::new(PanickingRuntime),
            },
            index: match replayers.index {
                Some(r) => Box::new(ReplayingPackageIndex::new(r)),
                None => Box::new(PanickingIndex),
            },
        })
    }
}

// --- Panicking adapters for unspecified ports ---

struct PanickingClock;
impl Clock for PanickingClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        panic!("Clock port not configured in CassetteConfig: no cassette loaded for clock");
    }
}

struct PanickingSolver;
impl PackageSolver for PanickingSolver {
    fn solve<'a>(&'a self, _request: &'a SolveRequest) -> PortFuture<'a, SolveResponse> {
        panic!("PackageSolver port not configured in CassetteConfig: no cassette loaded for solver");
    }
}

struct PanickingRuntime;
impl RuntimeManager for PanickingRuntime {
    fn list_installed<'a>(
        &'a self,
        _env: &'a str,
    ) -> PortFuture<'a, Option<Vec<InstalledPackage>>> {
        panic!(
            "RuntimeManager port not configured in CassetteConfig: no cassette loaded for runtime"
        );
    }
    fn create_environment<'a>(&'a self, _env: &'a str) -> PortFuture<'a, ()> {
        panic!(
            "RuntimeManager port not configured in CassetteConfig: no cassette loaded for runtime"
        );
    }
    fn delete_environment<'a>(&'a self, _env: &'a str) -> PortFuture<'a, ()> {
        panic!(
            "RuntimeManager port not configured in CassetteConfig: no cassette loaded for runtime"
        );
    }
    fn apply<'a>(
        &'a self,
        _env: &'a str,
        _changes: &'a ChangeSet,
    ) -> PortFuture<'a, Vec<ItemOutcome>> {
        panic!(
            "RuntimeManager port not configured in CassetteConfig: no cassette loaded for runtime"
        );
    }
}

struct PanickingIndex;
impl PackageIndex for PanickingIndex {
    fn release_files<'a>(
        &'a self,
        _name: &'a str,
        _version: &'a str,
    ) -> PortFuture<'a, Vec<ReleaseFile>> {
        panic!("PackageIndex port not configured in CassetteConfig: no cassette loaded for index");
    }
}
