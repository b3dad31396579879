//! The convergence loop: classify, plan, execute, re-classify.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ProjectConfig;
use crate::context::ServiceContext;
use crate::drift::{classify, DriftReport};
use crate::error::{OpsError, PartialApplyError, RuntimeQueryError};
use crate::lock::LockDocument;
use crate::plan::{execute, plan};
use crate::ports::ItemOutcome;
use crate::requirements::RequirementsDocument;
use crate::snapshot::{capture, EnvironmentSnapshot};
use crate::store::ProjectStore;

/// Requirements, lock, and environment read at one point in time.
#[derive(Debug, Clone)]
pub struct Observation {
    /// The requirements document.
    pub requirements: RequirementsDocument,
    /// The lock, if one has been generated.
    pub lock: Option<LockDocument>,
    /// The installed packages; empty when the environment does not exist.
    pub snapshot: EnvironmentSnapshot,
    /// Whether the managed environment exists.
    pub environment_exists: bool,
}

impl Observation {
    /// Classifies the observed triple.
    #[must_use]
    pub fn classify(&self) -> DriftReport {
        classify(&self.requirements, self.lock.as_ref(), &self.snapshot)
    }
}

/// Loads requirements and lock, then captures the environment.
///
/// A missing environment is observed as empty rather than failing, so
/// read-only commands can still report drift.
///
/// # Errors
///
/// Returns store, parse, and lock errors from loading, and
/// [`OpsError::RuntimeQuery`] when the runtime cannot be queried.
pub async fn observe(
    ctx: &ServiceContext,
    store: &ProjectStore<'_>,
    config: &ProjectConfig,
) -> Result<Observation, OpsError> {
    let requirements = store.load_requirements()?;
    let lock = store.load_lock()?;
    let (snapshot, environment_exists) =
        match capture(ctx, &config.env_name, config.runtime.timeout_secs).await {
            Ok(snapshot) => (snapshot, true),
            Err(RuntimeQueryError::EnvironmentNotFound(_)) => {
                (EnvironmentSnapshot::empty(&config.env_name), false)
            }
            Err(e) => return Err(e.into()),
        };
    Ok(Observation { requirements, lock, snapshot, environment_exists })
}

/// What a sync did and where it ended.
#[derive(Debug)]
pub struct SyncOutcome {
    /// Classification after the last round.
    pub report: DriftReport,
    /// Number of plans executed.
    pub rounds: u32,
    /// Whether the environment had to be created.
    pub created_environment: bool,
    /// Whether a new lock was written.
    pub lock_regenerated: bool,
    /// Per-item results of every install and remove.
    pub applied: Vec<ItemOutcome>,
    /// Items that failed in the round that stopped the loop.
    pub partial: Option<PartialApplyError>,
}

impl SyncOutcome {
    /// Turns a partial failure or leftover drift into an error.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::PartialApply`] when items failed and
    /// [`OpsError::NotConverged`] when drift remains.
    pub fn into_result(self, max_rounds: u32) -> Result<DriftReport, OpsError> {
        if let Some(partial) = self.partial {
            return Err(partial.into());
        }
        if !self.report.is_in_sync() {
            return Err(OpsError::NotConverged(max_rounds));
        }
        Ok(self.report)
    }
}

/// Brings the environment and lock in line with the requirements.
///
/// Creates the environment when it is missing, then repeats
/// classify → plan → execute until everything agrees or `sync.max_rounds`
/// plans have run. Every round re-captures the environment, so the report
/// reflects what the runtime actually did. After a partial failure the loop
/// stops and the outcome carries a fresh classification.
///
/// The caller must hold the project's state lock.
///
/// # Errors
///
/// Returns solve, store, and runtime-query errors. Per-item install and
/// remove failures are reported in [`SyncOutcome::partial`].
pub async fn sync(
    ctx: &ServiceContext,
    store: &ProjectStore<'_>,
    config: &ProjectConfig,
) -> Result<SyncOutcome, OpsError> {
    let observed = observe(ctx, store, config).await?;
    let Observation { requirements, mut lock, mut snapshot, environment_exists } = observed;

    let created_environment = !environment_exists;
    if created_environment {
        create_environment(ctx, config).await?;
        snapshot = recapture(ctx, config).await?;
    }

    let mut outcome = SyncOutcome {
        report: classify(&requirements, lock.as_ref(), &snapshot),
        rounds: 0,
        created_environment,
        lock_regenerated: false,
        applied: Vec::new(),
        partial: None,
    };

    while !outcome.report.is_in_sync() && outcome.rounds < config.sync.max_rounds {
        let plan = plan(&outcome.report, config);
        debug!(round = outcome.rounds + 1, steps = plan.steps.len(), "executing plan");
        let executed = execute(&plan, ctx, store, &requirements, lock.as_ref(), config).await?;
        outcome.rounds += 1;

        if let Some(fresh) = executed.lock.clone() {
            lock = Some(fresh);
            outcome.lock_regenerated = true;
        }
        let partial = executed.partial_failure();
        outcome.applied.extend(executed.applied);

        snapshot = recapture(ctx, config).await?;
        outcome.report = classify(&requirements, lock.as_ref(), &snapshot);

        if let Some(partial) = partial {
            warn!(failed = partial.failed.len(), "plan partially applied");
            outcome.partial = Some(partial);
            break;
        }
    }

    info!(rounds = outcome.rounds, in_sync = outcome.report.is_in_sync(), "sync finished");
    Ok(outcome)
}

/// Deletes the managed environment; `Ok(false)` when there was nothing to
/// delete.
///
/// # Errors
///
/// Returns runtime-query errors when the runtime cannot be reached, times
/// out, or fails to remove the environment.
pub async fn delete_environment(
    ctx: &ServiceContext,
    config: &ProjectConfig,
) -> Result<bool, OpsError> {
    let secs = config.runtime.timeout_secs;
    match capture(ctx, &config.env_name, secs).await {
        Ok(_) => {}
        Err(RuntimeQueryError::EnvironmentNotFound(_)) => {
            warn!(env = %config.env_name, "environment does not exist; nothing to delete");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    }
    info!(env = %config.env_name, "deleting environment");
    let call = ctx.runtime.delete_environment(&config.env_name);
    tokio::time::timeout(Duration::from_secs(secs), call)
        .await
        .map_err(|_| RuntimeQueryError::TimedOut(secs))?
        .map_err(|e| {
            RuntimeQueryError::Unavailable(format!(
                "cannot delete environment `{}`: {e}",
                config.env_name
            ))
        })?;
    Ok(true)
}

/// Deletes the environment, then converges a fresh one onto the lock.
///
/// # Errors
///
/// Returns anything [`delete_environment`] or [`sync`] returns.
pub async fn rebuild(
    ctx: &ServiceContext,
    store: &ProjectStore<'_>,
    config: &ProjectConfig,
) -> Result<SyncOutcome, OpsError> {
    delete_environment(ctx, config).await?;
    sync(ctx, store, config).await
}

async fn create_environment(ctx: &ServiceContext, config: &ProjectConfig) -> Result<(), OpsError> {
    let secs = config.runtime.timeout_secs;
    info!(env = %config.env_name, "creating environment");
    let call = ctx.runtime.create_environment(&config.env_name);
    tokio::time::timeout(Duration::from_secs(secs), call)
        .await
        .map_err(|_| RuntimeQueryError::TimedOut(secs))?
        .map_err(|e| {
            RuntimeQueryError::Unavailable(format!(
                "cannot create environment `{}`: {e}",
                config.env_name
            ))
        })?;
    Ok(())
}

async fn recapture(
    ctx: &ServiceContext,
    config: &ProjectConfig,
) -> Result<EnvironmentSnapshot, OpsError> {
    Ok(capture(ctx, &config.env_name, config.runtime.timeout_secs).await?)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::drift::{LockEnvironmentState, RequirementsLockState};
    use crate::testing::{conda, context, installed, pip, FakeRuntime, FakeSolver, MemFs};

    fn config() -> ProjectConfig {
        let mut config = ProjectConfig::for_env("demo");
        config.pip.fetch_hashes = false;
        config
    }

    fn project<'a>(fs: &'a MemFs, deps: &str) -> ProjectStore<'a> {
        let store = ProjectStore::new(fs, Path::new("/work/demo"));
        let req = RequirementsDocument::parse(&format!(
            "name: demo\nchannel-order: [defaults]\ndependencies: {deps}\n"
        ))
        .unwrap();
        store.init(&config(), &req, false).unwrap();
        store
    }

    #[tokio::test]
    async fn fresh_project_converges_from_an_empty_environment() {
        let fs = MemFs::default();
        let store = project(&fs, "[numpy]");
        let runtime = FakeRuntime::with(Vec::new());
        let ctx = context(FakeSolver::solving(vec![conda("numpy", "1.26.4")]), runtime.clone());

        let outcome = sync(&ctx, &store, &config()).await.unwrap();
        assert_eq!(outcome.rounds, 2);
        assert!(outcome.lock_regenerated);
        assert!(!outcome.created_environment);
        assert!(outcome.report.is_in_sync());
        assert_eq!(runtime.names(), ["numpy=1.26.4"]);
        assert!(store.load_lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn space_separated_conda_version_accepts_a_patch_release() {
        let fs = MemFs::default();
        let store = project(&fs, "['python 3.11']");
        let runtime = FakeRuntime::with(Vec::new());
        let ctx = context(FakeSolver::solving(vec![conda("python", "3.11.9")]), runtime.clone());

        let outcome = sync(&ctx, &store, &config()).await.unwrap();
        assert!(outcome.report.is_in_sync());
        assert!(outcome.report.requirements_diff.is_empty());
        assert_eq!(runtime.names(), ["python=3.11.9"]);
    }

    #[tokio::test]
    async fn editable_install_converges() {
        let fs = MemFs::default();
        let store = project(&fs, "[python, {pip: ['-e ./src']}]");
        let runtime = FakeRuntime::with(Vec::new());
        let ctx = context(
            FakeSolver::solving(vec![
                conda("python", "3.11.9"),
                pip("mypkg", "0.3.0", "file:///work/demo/src"),
            ]),
            runtime.clone(),
        );

        let outcome = sync(&ctx, &store, &config()).await.unwrap();
        assert!(outcome.report.is_in_sync());
        assert_eq!(runtime.names(), ["mypkg=0.3.0", "python=3.11.9"]);
        outcome.into_result(config().sync.max_rounds).unwrap();
    }

    #[tokio::test]
    async fn rebuild_reinstalls_exactly_the_lock() {
        let fs = MemFs::default();
        let store = project(&fs, "[numpy]");
        let runtime = FakeRuntime::with(Vec::new());
        let ctx = context(FakeSolver::solving(vec![conda("numpy", "1.26.4")]), runtime.clone());
        sync(&ctx, &store, &config()).await.unwrap().into_result(3).unwrap();
        runtime.installed.lock().unwrap().as_mut().unwrap().push(installed("scipy", "1.13.0"));

        let outcome = rebuild(&ctx, &store, &config()).await.unwrap();
        assert!(outcome.created_environment);
        assert!(!outcome.lock_regenerated);
        assert!(outcome.report.is_in_sync());
        assert_eq!(runtime.names(), ["numpy=1.26.4"]);
    }

    #[tokio::test]
    async fn deleting_a_missing_environment_is_a_no_op() {
        let runtime = FakeRuntime::default();
        let ctx = context(FakeSolver::solving(Vec::new()), runtime.clone());
        assert!(!delete_environment(&ctx, &config()).await.unwrap());

        let runtime = FakeRuntime::with(vec![installed("numpy", "1.26.4")]);
        let ctx = context(FakeSolver::solving(Vec::new()), runtime.clone());
        assert!(delete_environment(&ctx, &config()).await.unwrap());
        assert!(runtime.installed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_environment_is_created() {
        let fs = MemFs::default();
        let store = project(&fs, "[numpy]");
        let runtime = FakeRuntime::default();
        let ctx = context(FakeSolver::solving(vec![conda("numpy", "1.26.4")]), runtime.clone());

        let outcome = sync(&ctx, &store, &config()).await.unwrap();
        assert!(outcome.created_environment);
        assert_eq!(runtime.names(), ["numpy=1.26.4"]);
    }

    #[tokio::test]
    async fn mixed_drift_installs_then_removes_in_a_later_round() {
        let fs = MemFs::default();
        let store = project(&fs, "[numpy]");
        let runtime = FakeRuntime::with(vec![installed("scipy", "1.13.0")]);
        let ctx = context(FakeSolver::solving(vec![conda("numpy", "1.26.4")]), runtime.clone());

        let outcome = sync(&ctx, &store, &config()).await.unwrap();
        assert_eq!(outcome.rounds, 3);
        assert!(outcome.report.is_in_sync());
        assert_eq!(runtime.names(), ["numpy=1.26.4"]);
    }

    #[tokio::test]
    async fn partial_failure_stops_with_a_fresh_report() {
        let fs = MemFs::default();
        let store = project(&fs, "[numpy, scipy]");
        let runtime = FakeRuntime { failing: vec!["scipy".into()], ..FakeRuntime::with(vec![]) };
        let ctx = context(
            FakeSolver::solving(vec![conda("numpy", "1.26.4"), conda("scipy", "1.13.0")]),
            runtime.clone(),
        );

        let outcome = sync(&ctx, &store, &config()).await.unwrap();
        let partial = outcome.partial.as_ref().unwrap();
        assert_eq!(partial.succeeded, ["conda:numpy"]);
        assert_eq!(outcome.report.requirements_vs_lock, RequirementsLockState::InSync);
        assert_eq!(outcome.report.lock_vs_environment, LockEnvironmentState::Behind);
        assert_eq!(outcome.report.environment_diff.len(), 1);
        assert!(matches!(outcome.into_result(3), Err(OpsError::PartialApply(_))));
    }

    #[tokio::test]
    async fn round_limit_reports_non_convergence() {
        let fs = MemFs::default();
        let store = project(&fs, "[numpy]");
        let ctx = context(
            FakeSolver::solving(vec![conda("numpy", "1.26.4")]),
            FakeRuntime::with(Vec::new()),
        );
        let mut config = config();
        config.sync.max_rounds = 1;

        let outcome = sync(&ctx, &store, &config).await.unwrap();
        assert_eq!(outcome.rounds, 1);
        assert!(matches!(outcome.into_result(1), Err(OpsError::NotConverged(1))));
    }

    #[tokio::test]
    async fn removing_a_requirement_regenerates_before_removing() {
        let fs = MemFs::default();
        let store = project(&fs, "[numpy, scipy]");
        let runtime = FakeRuntime::with(Vec::new());
        let solver = FakeSolver::solving(vec![conda("numpy", "1.26.4"), conda("scipy", "1.13.0")]);
        let ctx = context(solver, runtime.clone());
        sync(&ctx, &store, &config()).await.unwrap().into_result(3).unwrap();

        let mut req = store.load_requirements().unwrap();
        req.remove(&["numpy"]);
        store.save_requirements(&req).unwrap();
        let mut ctx = ctx;
        ctx.solver = Box::new(FakeSolver::solving(vec![conda("scipy", "1.13.0")]));

        let observed = observe(&ctx, &store, &config()).await.unwrap();
        let report = observed.classify();
        assert_eq!(report.requirements_vs_lock, RequirementsLockState::Stale);
        let first = plan(&report, &config());
        assert_eq!(first.steps[0].kind, crate::plan::StepKind::RegenerateLock);

        let outcome = sync(&ctx, &store, &config()).await.unwrap();
        assert!(outcome.report.is_in_sync());
        assert_eq!(runtime.names(), ["scipy=1.13.0"]);
    }

    #[tokio::test]
    async fn frozen_project_refuses_to_rewrite_the_lock() {
        let fs = MemFs::default();
        let store = project(&fs, "[numpy]");
        let ctx = context(
            FakeSolver::solving(vec![conda("numpy", "1.26.4")]),
            FakeRuntime::with(Vec::new()),
        );
        let mut config = config();
        config.sync.frozen = true;

        let err = sync(&ctx, &store, &config).await.unwrap_err();
        assert!(matches!(err, OpsError::FrozenLock("missing")));
        assert!(store.load_lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn observe_treats_missing_environment_as_empty() {
        let fs = MemFs::default();
        let store = project(&fs, "[numpy]");
        let ctx = context(FakeSolver::failing("unused"), FakeRuntime::default());
        let observed = observe(&ctx, &store, &config()).await.unwrap();
        assert!(!observed.environment_exists);
        assert!(observed.snapshot.packages.is_empty());
        assert_eq!(observed.classify().requirements_vs_lock, RequirementsLockState::Missing);
    }
}
