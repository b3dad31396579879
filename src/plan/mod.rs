//! Reconciliation planning.
//!
//! [`plan`] turns a [`DriftReport`] into the ordered steps that move the
//! three models toward agreement. It is pure: execution lives in
//! [`execute`].

pub mod execute;

use serde::Serialize;

use crate::config::ProjectConfig;
use crate::drift::{DiffAction, DriftReport, LockEnvironmentState, RequirementsLockState};
use crate::reference::PackageKey;

pub use execute::{execute, ExecutionOutcome};

/// Kind of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Solve the requirements without writing a lock (frozen projects).
    Resolve,
    /// Solve the requirements and write a fresh lock.
    RegenerateLock,
    /// Install or re-pin packages from the lock.
    Install,
    /// Remove packages the lock does not contain.
    Remove,
}

impl StepKind {
    /// Label used in reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Resolve => "resolve",
            StepKind::RegenerateLock => "regenerate_lock",
            StepKind::Install => "install",
            StepKind::Remove => "remove",
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    /// What to do.
    pub kind: StepKind,
    /// Packages the step applies to; the declared packages for solve steps.
    pub targets: Vec<PackageKey>,
}

/// Ordered steps plus whether classification must run again afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionPlan {
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
    /// Set when the steps cannot by themselves reach agreement: after a
    /// lock regeneration, or when removals were deferred.
    pub reclassify: bool,
}

impl ActionPlan {
    /// Whether there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn single(kind: StepKind, targets: Vec<PackageKey>, reclassify: bool) -> Self {
        Self { steps: vec![PlanStep { kind, targets }], reclassify }
    }
}

/// Computes the plan for `report`.
///
/// A missing or stale lock always yields a single solve step, whatever the
/// environment looks like; install and remove steps are only derived from a
/// lock that matches the requirements. When the environment both lags and
/// has extras, only the installs are planned and `reclassify` is set, so
/// removals are computed afresh once the installs have landed.
#[must_use]
pub fn plan(report: &DriftReport, config: &ProjectConfig) -> ActionPlan {
    if report.requirements_vs_lock != RequirementsLockState::InSync {
        let targets = report.requirements_diff.iter().map(|d| d.key.clone()).collect();
        return if config.sync.frozen {
            ActionPlan::single(StepKind::Resolve, targets, false)
        } else {
            ActionPlan::single(StepKind::RegenerateLock, targets, true)
        };
    }

    match report.lock_vs_environment {
        LockEnvironmentState::InSync => ActionPlan::default(),
        LockEnvironmentState::Behind => {
            let targets = report.environment_targets(&[
                DiffAction::ToAdd,
                DiffAction::ToUpgrade,
                DiffAction::ToDowngrade,
            ]);
            let deferred = !report.environment_targets(&[DiffAction::ToRemove]).is_empty();
            ActionPlan::single(StepKind::Install, targets, deferred)
        }
        LockEnvironmentState::Ahead => ActionPlan::single(
            StepKind::Remove,
            report.environment_targets(&[DiffAction::ToRemove]),
            false,
        ),
    }
}
