//! Human-facing rendering of drift reports, plans, and apply results.

use std::fmt::Write as _;

use crate::drift::{
    DiffEntry, DriftReport, LockEnvironmentState, RequirementsEnvironmentState,
    RequirementsLockState,
};
use crate::plan::{ActionPlan, StepKind};
use crate::ports::{ChangeKind, ItemOutcome};

fn requirements_lock_label(state: RequirementsLockState) -> &'static str {
    match state {
        RequirementsLockState::InSync => "in_sync",
        RequirementsLockState::Stale => "stale",
        RequirementsLockState::Missing => "missing",
    }
}

fn lock_environment_label(state: LockEnvironmentState) -> &'static str {
    match state {
        LockEnvironmentState::InSync => "in_sync",
        LockEnvironmentState::Behind => "behind",
        LockEnvironmentState::Ahead => "ahead",
    }
}

fn requirements_environment_label(state: RequirementsEnvironmentState) -> &'static str {
    match state {
        RequirementsEnvironmentState::InSync => "in_sync",
        RequirementsEnvironmentState::OutOfSync => "out_of_sync",
    }
}

fn format_entry(entry: &DiffEntry) -> String {
    let mut line = format!("    {:<12} {}", entry.action.as_str(), entry.key);
    if let Some(channel) = &entry.channel {
        let _ = write!(line, " [{channel}]");
    }
    let _ = match (&entry.from, &entry.to) {
        (Some(from), Some(to)) => write!(line, "  {from} -> {to}"),
        (Some(from), None) => write!(line, "  {from}"),
        (None, Some(to)) => write!(line, "  -> {to}"),
        (None, None) => Ok(()),
    };
    line
}

/// Renders every comparison with its differing packages, followed by
/// guidance. Nothing that drifts is left out.
#[must_use]
pub fn format_report(report: &DriftReport, environment_exists: bool) -> String {
    let mut lines = vec![format!(
        "requirements vs lock:        {}",
        requirements_lock_label(report.requirements_vs_lock)
    )];
    lines.extend(report.requirements_diff.iter().map(format_entry));
    lines.push(format!(
        "lock vs environment:         {}",
        lock_environment_label(report.lock_vs_environment)
    ));
    lines.extend(report.environment_diff.iter().map(format_entry));
    lines.push(format!(
        "requirements vs environment: {}",
        requirements_environment_label(report.requirements_vs_environment)
    ));

    let hints = guidance(report, environment_exists);
    if !hints.is_empty() {
        lines.push(String::new());
        lines.extend(hints);
    }
    lines.join("\n")
}

/// Next steps for the user, one per line.
#[must_use]
pub fn guidance(report: &DriftReport, environment_exists: bool) -> Vec<String> {
    let mut hints = Vec::new();
    if !environment_exists {
        hints.push(
            "The environment does not exist yet; `envops sync` will create it.".to_string(),
        );
    }
    match report.requirements_vs_lock {
        RequirementsLockState::Missing => hints.push(
            "No lock has been generated; run `envops sync` or `envops lock` to solve the \
             requirements."
                .to_string(),
        ),
        RequirementsLockState::Stale => hints.push(
            "The lock does not match the requirements; run `envops sync` to re-solve and \
             update the environment."
                .to_string(),
        ),
        RequirementsLockState::InSync => match report.lock_vs_environment {
            LockEnvironmentState::Behind => hints.push(
                "The environment lags the lock; run `envops sync` to install the missing \
                 packages."
                    .to_string(),
            ),
            LockEnvironmentState::Ahead => hints.push(
                "The environment has packages the lock does not; run `envops sync` to remove \
                 them, or `envops add` them to keep them."
                    .to_string(),
            ),
            LockEnvironmentState::InSync => {
                hints.push("Requirements, lock, and environment agree.".to_string());
            }
        },
    }
    hints
}

/// Renders a plan as one line per step.
#[must_use]
pub fn format_plan(plan: &ActionPlan) -> String {
    if plan.is_empty() {
        return "Nothing to do.".to_string();
    }
    let mut lines = Vec::new();
    for step in &plan.steps {
        let label = step.kind.as_str().to_uppercase();
        match step.kind {
            StepKind::Resolve | StepKind::RegenerateLock => {
                lines.push(format!("  {label} ({} declared change(s))", step.targets.len()));
            }
            StepKind::Install | StepKind::Remove => {
                let targets: Vec<String> = step.targets.iter().map(ToString::to_string).collect();
                lines.push(format!("  {label} {}", targets.join(", ")));
            }
        }
    }
    if plan.reclassify {
        lines.push("  then re-classify and plan again".to_string());
    }
    lines.join("\n")
}

/// Renders per-item install and remove results.
#[must_use]
pub fn format_applied(outcomes: &[ItemOutcome]) -> String {
    outcomes
        .iter()
        .map(|o| {
            let (verb, attempted) = match o.kind {
                ChangeKind::Install => ("installed", "install"),
                ChangeKind::Remove => ("removed", "remove"),
            };
            match &o.error {
                None => format!("  {verb} {}", o.key),
                Some(e) => format!("  FAILED {attempted} {}: {e}", o.key),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::DiffAction;
    use crate::plan::PlanStep;
    use crate::reference::{Manager, PackageKey};

    fn report(
        requirements_vs_lock: RequirementsLockState,
        lock_vs_environment: LockEnvironmentState,
    ) -> DriftReport {
        DriftReport {
            requirements_vs_lock,
            lock_vs_environment,
            requirements_vs_environment: RequirementsEnvironmentState::OutOfSync,
            requirements_diff: Vec::new(),
            environment_diff: vec![DiffEntry {
                key: PackageKey::new(Manager::Conda, "scipy"),
                action: DiffAction::ToRemove,
                channel: Some("defaults".into()),
                from: Some("1.13.0".into()),
                to: None,
            }],
        }
    }

    #[test]
    fn report_lists_every_drifting_package() {
        let text = format_report(
            &report(RequirementsLockState::InSync, LockEnvironmentState::Ahead),
            true,
        );
        assert!(text.contains("lock vs environment:         ahead"));
        assert!(text.contains("to_remove    conda:scipy [defaults]  1.13.0"));
        assert!(text.contains("requirements vs environment: out_of_sync"));
        assert!(text.contains("remove"));
    }

    #[test]
    fn guidance_mentions_missing_environment_and_lock() {
        let hints =
            guidance(&report(RequirementsLockState::Missing, LockEnvironmentState::InSync), false);
        assert_eq!(hints.len(), 2);
        assert!(hints[0].contains("does not exist"));
        assert!(hints[1].contains("envops lock"));
    }

    #[test]
    fn plan_rendering() {
        assert_eq!(format_plan(&ActionPlan::default()), "Nothing to do.");
        let plan = ActionPlan {
            steps: vec![PlanStep {
                kind: StepKind::Install,
                targets: vec![
                    PackageKey::new(Manager::Conda, "numpy"),
                    PackageKey::new(Manager::Pip, "rich"),
                ],
            }],
            reclassify: true,
        };
        let text = format_plan(&plan);
        assert!(text.contains("INSTALL conda:numpy, pip:rich"));
        assert!(text.contains("re-classify"));
    }

    #[test]
    fn applied_rendering_marks_failures() {
        let text = format_applied(&[
            ItemOutcome {
                key: PackageKey::new(Manager::Conda, "numpy"),
                kind: ChangeKind::Install,
                error: None,
            },
            ItemOutcome {
                key: PackageKey::new(Manager::Conda, "scipy"),
                kind: ChangeKind::Install,
                error: Some("conflict".into()),
            },
        ]);
        assert!(text.contains("installed conda:numpy"));
        assert!(text.contains("FAILED install conda:scipy: conflict"));
    }
}
