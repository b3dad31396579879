//! Executes an [`ActionPlan`] against the solver and the runtime manager.

use std::time::Duration;

use tracing::{info, warn};

use super::{ActionPlan, PlanStep, StepKind};
use crate::config::ProjectConfig;
use crate::context::ServiceContext;
use crate::error::{FailedItem, OpsError, PartialApplyError};
use crate::lock::{self, LockDocument};
use crate::ports::{ChangeKind, ChangeSet, ItemOutcome};
use crate::requirements::RequirementsDocument;
use crate::store::ProjectStore;

/// What executing a plan did.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    /// The lock written by a `regenerate_lock` step.
    pub lock: Option<LockDocument>,
    /// Per-item results of install and remove steps.
    pub applied: Vec<ItemOutcome>,
}

impl ExecutionOutcome {
    /// Per-item failures as a [`PartialApplyError`], or `None` when every
    /// item succeeded.
    #[must_use]
    pub fn partial_failure(&self) -> Option<PartialApplyError> {
        let failed: Vec<FailedItem> = self
            .applied
            .iter()
            .filter_map(|o| {
                o.error.as_ref().map(|e| FailedItem { name: o.key.to_string(), message: e.clone() })
            })
            .collect();
        if failed.is_empty() {
            return None;
        }
        let succeeded = self
            .applied
            .iter()
            .filter(|o| o.error.is_none())
            .map(|o| o.key.to_string())
            .collect();
        Some(PartialApplyError { succeeded, failed })
    }
}

/// Runs every step of `plan` in order.
///
/// A solve failure aborts the plan with no further steps run. Install and
/// remove failures are collected per item and never rolled back; completed
/// items stay applied.
///
/// # Errors
///
/// Returns [`OpsError::Solve`] when the solver fails, [`OpsError::FrozenLock`]
/// after a `resolve` step (the lock may not be rewritten), and store errors
/// when the new lock cannot be written.
pub async fn execute(
    plan: &ActionPlan,
    ctx: &ServiceContext,
    store: &ProjectStore<'_>,
    requirements: &RequirementsDocument,
    existing: Option<&LockDocument>,
    config: &ProjectConfig,
) -> Result<ExecutionOutcome, OpsError> {
    let mut outcome = ExecutionOutcome::default();
    for step in &plan.steps {
        match step.kind {
            StepKind::Resolve => {
                let packages = lock::solve(requirements, ctx, config).await?;
                info!(packages = packages.len(), "resolved requirements; lock left unchanged");
                let state = if existing.is_some() { "stale" } else { "missing" };
                return Err(OpsError::FrozenLock(state));
            }
            StepKind::RegenerateLock => {
                let fresh = lock::generate(requirements, ctx, config).await?;
                store.save_lock(&fresh)?;
                outcome.lock = Some(fresh);
            }
            StepKind::Install | StepKind::Remove => {
                let current = outcome.lock.as_ref().or(existing);
                let changes = change_set(step, current);
                if changes.is_empty() {
                    continue;
                }
                let results = apply(ctx, config, &changes, step.kind).await;
                outcome.applied.extend(results);
            }
        }
    }
    Ok(outcome)
}

fn change_set(step: &PlanStep, lock: Option<&LockDocument>) -> ChangeSet {
    match step.kind {
        StepKind::Remove => ChangeSet { install: Vec::new(), remove: step.targets.clone() },
        _ => {
            let install = step
                .targets
                .iter()
                .filter_map(|key| {
                    let entry = lock.and_then(|l| l.get(key));
                    if entry.is_none() {
                        warn!(package = %key, "install target has no lock entry; skipped");
                    }
                    entry.map(crate::lock::LockEntry::install_item)
                })
                .collect();
            ChangeSet { install, remove: Vec::new() }
        }
    }
}

/// Applies `changes` under the runtime timeout. When the runtime cannot be
/// invoked at all every item is reported as failed with that reason.
async fn apply(
    ctx: &ServiceContext,
    config: &ProjectConfig,
    changes: &ChangeSet,
    kind: StepKind,
) -> Vec<ItemOutcome> {
    let secs = config.runtime.timeout_secs;
    info!(
        step = kind.as_str(),
        install = changes.install.len(),
        remove = changes.remove.len(),
        "applying changes"
    );
    let call = ctx.runtime.apply(&config.env_name, changes);
    let failure = match tokio::time::timeout(Duration::from_secs(secs), call).await {
        Ok(Ok(outcomes)) => return outcomes,
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("runtime did not finish within {secs}s"),
    };
    warn!(step = kind.as_str(), error = %failure, "runtime call failed");
    let installs = changes.install.iter().map(|i| {
        (crate::reference::PackageKey::new(i.manager, &i.name), ChangeKind::Install)
    });
    let removals = changes.remove.iter().map(|k| (k.clone(), ChangeKind::Remove));
    installs
        .chain(removals)
        .map(|(key, kind)| ItemOutcome { key, kind, error: Some(failure.clone()) })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::drift::classify;
    use crate::plan::plan;
    use crate::reference::{Manager, PackageKey};
    use crate::snapshot::EnvironmentSnapshot;
    use crate::testing::{conda, context, installed, FakeRuntime, FakeSolver, MemFs};

    fn config() -> ProjectConfig {
        let mut config = ProjectConfig::for_env("demo");
        config.pip.fetch_hashes = false;
        config
    }

    fn reqs(deps: &str) -> RequirementsDocument {
        RequirementsDocument::parse(&format!("channel-order: [defaults]\ndependencies: {deps}\n"))
            .unwrap()
    }

    fn step(kind: StepKind, names: &[&str]) -> ActionPlan {
        ActionPlan {
            steps: vec![PlanStep {
                kind,
                targets: names.iter().map(|n| PackageKey::new(Manager::Conda, n)).collect(),
            }],
            reclassify: false,
        }
    }

    #[tokio::test]
    async fn regenerate_writes_the_lock() {
        let solver = FakeSolver::solving(vec![conda("numpy", "1.26.4")]);
        let ctx = context(solver, FakeRuntime::default());
        let fs = MemFs::default();
        let store = ProjectStore::new(&fs, Path::new("/p"));
        let req = reqs("[numpy]");

        let outcome =
            execute(&step(StepKind::RegenerateLock, &[]), &ctx, &store, &req, None, &config())
                .await
                .unwrap();
        let written = store.load_lock().unwrap().unwrap();
        assert_eq!(outcome.lock.as_ref(), Some(&written));
        assert!(!written.is_stale(&req));
    }

    #[tokio::test]
    async fn solve_failure_is_fatal_and_writes_nothing() {
        let solver = FakeSolver::failing("nothing provides numpy >=9");
        let ctx = context(solver, FakeRuntime::default());
        let fs = MemFs::default();
        let store = ProjectStore::new(&fs, Path::new("/p"));
        let req = reqs("['numpy>=9']");

        let err = execute(&step(StepKind::RegenerateLock, &[]), &ctx, &store, &req, None, &config())
            .await
            .unwrap_err();
        assert!(matches!(&err, OpsError::Solve(e) if e.diagnostic.contains("nothing provides")));
        assert!(store.load_lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_step_leaves_the_lock_alone() {
        let solver = FakeSolver::solving(vec![conda("numpy", "1.26.4")]);
        let ctx = context(solver, FakeRuntime::default());
        let fs = MemFs::default();
        let store = ProjectStore::new(&fs, Path::new("/p"));
        let err =
            execute(&step(StepKind::Resolve, &[]), &ctx, &store, &reqs("[numpy]"), None, &config())
                .await
                .unwrap_err();
        assert!(matches!(err, OpsError::FrozenLock("missing")));
        assert!(store.load_lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn install_failures_are_reported_per_item_without_rollback() {
        let runtime = FakeRuntime {
            failing: vec!["scipy".into()],
            ..FakeRuntime::with(Vec::new())
        };
        let ctx = context(
            FakeSolver::solving(vec![conda("numpy", "1.26.4"), conda("scipy", "1.13.0")]),
            runtime.clone(),
        );
        let fs = MemFs::default();
        let store = ProjectStore::new(&fs, Path::new("/p"));
        let req = reqs("[numpy, scipy]");
        let lock = lock::generate(&req, &ctx, &config()).await.unwrap();

        let outcome = execute(
            &step(StepKind::Install, &["numpy", "scipy"]),
            &ctx,
            &store,
            &req,
            Some(&lock),
            &config(),
        )
        .await
        .unwrap();
        let partial = outcome.partial_failure().unwrap();
        assert_eq!(partial.succeeded, ["conda:numpy"]);
        assert_eq!(partial.failed.len(), 1);
        assert_eq!(partial.failed[0].name, "conda:scipy");
        assert_eq!(runtime.names(), ["numpy=1.26.4"]);
    }

    #[tokio::test]
    async fn removal_runs_against_the_environment() {
        let runtime = FakeRuntime::with(vec![installed("numpy", "1.26.4"), installed("scipy", "1")]);
        let ctx = context(FakeSolver::solving(vec![conda("numpy", "1.26.4")]), runtime.clone());
        let fs = MemFs::default();
        let store = ProjectStore::new(&fs, Path::new("/p"));
        let req = reqs("[numpy]");
        let lock = lock::generate(&req, &ctx, &config()).await.unwrap();

        let snapshot = EnvironmentSnapshot {
            env_name: "demo".into(),
            packages: vec![installed("numpy", "1.26.4"), installed("scipy", "1")],
        };
        let report = classify(&req, Some(&lock), &snapshot);
        let plan = plan(&report, &config());
        let outcome =
            execute(&plan, &ctx, &store, &req, Some(&lock), &config()).await.unwrap();
        assert!(outcome.partial_failure().is_none());
        assert_eq!(runtime.names(), ["numpy=1.26.4"]);
    }
}
