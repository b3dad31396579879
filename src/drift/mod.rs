//! Drift classification between requirements, lock, and environment.
//!
//! Classification is pure: it compares already-loaded models and never
//! touches the solver or the runtime.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::lock::{CoverageGap, LockDocument, LockEntry};
use crate::ports::InstalledPackage;
use crate::reference::PackageKey;
use crate::requirements::RequirementsDocument;
use crate::snapshot::EnvironmentSnapshot;
use crate::version::{self, Violation};

/// Requirements compared with the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementsLockState {
    /// The lock was solved from the current requirements and covers them.
    InSync,
    /// The requirements changed since the lock was solved, or the lock no
    /// longer satisfies them.
    Stale,
    /// There is no lock.
    Missing,
}

/// Lock compared with the installed environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEnvironmentState {
    /// Installed packages match the lock exactly.
    InSync,
    /// The environment lacks packages or has different versions.
    Behind,
    /// The environment only has extra packages.
    Ahead,
}

/// Requirements compared with the environment, derived from the other two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementsEnvironmentState {
    /// Both other comparisons are in sync.
    InSync,
    /// At least one other comparison reports drift.
    OutOfSync,
}

/// What must happen to one package to remove a difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    /// Present on the reference side, absent on the other.
    ToAdd,
    /// Present only on the side being brought into line.
    ToRemove,
    /// Needs a newer version.
    ToUpgrade,
    /// Needs an older version.
    ToDowngrade,
}

impl DiffAction {
    /// Label used in reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DiffAction::ToAdd => "to_add",
            DiffAction::ToRemove => "to_remove",
            DiffAction::ToUpgrade => "to_upgrade",
            DiffAction::ToDowngrade => "to_downgrade",
        }
    }
}

/// One differing package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    /// The package.
    pub key: PackageKey,
    /// What has to happen to it.
    pub action: DiffAction,
    /// Channel of the differing entry, which separates same-name entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Current version on the side that has to change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Target version or constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Pairwise drift between requirements, lock, and environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Requirements vs lock.
    pub requirements_vs_lock: RequirementsLockState,
    /// Lock vs environment.
    pub lock_vs_environment: LockEnvironmentState,
    /// Requirements vs environment.
    pub requirements_vs_environment: RequirementsEnvironmentState,
    /// Declared packages the lock is missing or pins outside their
    /// constraint.
    pub requirements_diff: Vec<DiffEntry>,
    /// Changes the environment needs to match the lock.
    pub environment_diff: Vec<DiffEntry>,
}

impl DriftReport {
    /// Whether all three models agree.
    #[must_use]
    pub fn is_in_sync(&self) -> bool {
        self.requirements_vs_environment == RequirementsEnvironmentState::InSync
    }

    /// Distinct environment keys tagged with any of `actions`, in diff order.
    #[must_use]
    pub fn environment_targets(&self, actions: &[DiffAction]) -> Vec<PackageKey> {
        let mut seen = BTreeSet::new();
        self.environment_diff
            .iter()
            .filter(|d| actions.contains(&d.action))
            .filter(|d| seen.insert(d.key.clone()))
            .map(|d| d.key.clone())
            .collect()
    }
}

/// Classifies drift across the three models.
///
/// A missing lock is compared with the environment as if it were empty, so
/// every installed package is reported even before the first solve.
#[must_use]
pub fn classify(
    requirements: &RequirementsDocument,
    lock: Option<&LockDocument>,
    snapshot: &EnvironmentSnapshot,
) -> DriftReport {
    let (requirements_vs_lock, requirements_diff) = match lock {
        None => {
            let diff = requirements
                .references()
                .map(|r| DiffEntry {
                    key: r.key(),
                    action: DiffAction::ToAdd,
                    channel: r.channel().map(str::to_string),
                    from: None,
                    to: r.version_spec().map(str::to_string),
                })
                .collect();
            (RequirementsLockState::Missing, diff)
        }
        Some(lock) => {
            let diff: Vec<DiffEntry> =
                lock.coverage_gaps(requirements).into_iter().map(gap_entry).collect();
            let state = if lock.is_stale(requirements) || !diff.is_empty() {
                RequirementsLockState::Stale
            } else {
                RequirementsLockState::InSync
            };
            (state, diff)
        }
    };

    let empty = BTreeMap::new();
    let locked = lock.map_or(&empty, LockDocument::entries);
    let environment_diff = environment_diff(locked, &snapshot.packages);

    let lock_vs_environment = if environment_diff.iter().any(|d| d.action != DiffAction::ToRemove)
    {
        LockEnvironmentState::Behind
    } else if environment_diff.is_empty() {
        LockEnvironmentState::InSync
    } else {
        LockEnvironmentState::Ahead
    };

    let requirements_vs_environment = if requirements_vs_lock == RequirementsLockState::InSync
        && lock_vs_environment == LockEnvironmentState::InSync
    {
        RequirementsEnvironmentState::InSync
    } else {
        RequirementsEnvironmentState::OutOfSync
    };

    DriftReport {
        requirements_vs_lock,
        lock_vs_environment,
        requirements_vs_environment,
        requirements_diff,
        environment_diff,
    }
}

fn gap_entry(gap: CoverageGap) -> DiffEntry {
    let action = match gap.violation {
        None => DiffAction::ToAdd,
        Some(Violation::TooLow | Violation::Excluded) => DiffAction::ToUpgrade,
        Some(Violation::TooHigh) => DiffAction::ToDowngrade,
    };
    DiffEntry { key: gap.key, action, channel: gap.channel, from: gap.locked, to: gap.required }
}

fn environment_diff(
    locked: &BTreeMap<PackageKey, LockEntry>,
    installed: &[InstalledPackage],
) -> Vec<DiffEntry> {
    let mut by_key: BTreeMap<PackageKey, Vec<&InstalledPackage>> = BTreeMap::new();
    for package in installed {
        by_key.entry(package.key()).or_default().push(package);
    }

    let mut diff = Vec::new();
    for (key, entry) in locked {
        let mut present = by_key.remove(key).unwrap_or_default();
        let Some(matched) = take_counterpart(&mut present, entry) else {
            diff.push(DiffEntry {
                key: key.clone(),
                action: DiffAction::ToAdd,
                channel: entry.channel.clone(),
                from: None,
                to: Some(entry.version.clone()),
            });
            continue;
        };
        let action = match version::compare(&entry.version, &matched.version) {
            Ordering::Greater => Some(DiffAction::ToUpgrade),
            Ordering::Less => Some(DiffAction::ToDowngrade),
            Ordering::Equal => None,
        };
        if let Some(action) = action {
            diff.push(DiffEntry {
                key: key.clone(),
                action,
                channel: entry.channel.clone(),
                from: Some(matched.version.clone()),
                to: Some(entry.version.clone()),
            });
        }
        diff.extend(present.into_iter().map(|extra| removal(key, extra)));
    }
    for (key, extras) in by_key {
        diff.extend(extras.into_iter().map(|extra| removal(&key, extra)));
    }
    diff
}

/// Removes and returns the installed package the lock entry describes:
/// the one on the locked channel if there is one, otherwise the first.
fn take_counterpart<'a>(
    present: &mut Vec<&'a InstalledPackage>,
    entry: &LockEntry,
) -> Option<&'a InstalledPackage> {
    if present.is_empty() {
        return None;
    }
    let index = present
        .iter()
        .position(|p| p.channel.is_some() && p.channel == entry.channel)
        .unwrap_or(0);
    Some(present.remove(index))
}

fn removal(key: &PackageKey, package: &InstalledPackage) -> DiffEntry {
    DiffEntry {
        key: key.clone(),
        action: DiffAction::ToRemove,
        channel: package.channel.clone(),
        from: Some(package.version.clone()),
        to: None,
    }
}
