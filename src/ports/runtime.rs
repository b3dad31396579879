//! Runtime-manager port: queries and mutates the managed environment.

use serde::{Deserialize, Serialize};

use super::PortFuture;
use crate::reference::{Manager, PackageKey};

/// One package present in the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    /// Owning manager.
    pub manager: Manager,
    /// Package name as reported by the runtime.
    pub name: String,
    /// Installed version.
    pub version: String,
    /// Channel the package came from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Build string, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

impl InstalledPackage {
    /// The `(manager, normalized name)` identity.
    #[must_use]
    pub fn key(&self) -> PackageKey {
        PackageKey::new(self.manager, &self.name)
    }
}

/// A package to install, pinned by the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallItem {
    /// Owning manager.
    pub manager: Manager,
    /// Package name.
    pub name: String,
    /// Exact version to install.
    pub version: String,
    /// Install argument understood by the manager (explicit spec, URL, or
    /// source path).
    pub spec: String,
}

/// Install and remove lists applied in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Packages to install or re-pin.
    pub install: Vec<InstallItem>,
    /// Packages to remove.
    pub remove: Vec<PackageKey>,
}

impl ChangeSet {
    /// Whether there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.remove.is_empty()
    }
}

/// Whether an item was installed or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Install or re-pin.
    Install,
    /// Removal.
    Remove,
}

/// Result for one item of a [`ChangeSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// The package.
    pub key: PackageKey,
    /// What was attempted.
    pub kind: ChangeKind,
    /// Failure message; `None` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Queries and mutates a managed runtime environment.
pub trait RuntimeManager: Send + Sync {
    /// Lists installed packages; `Ok(None)` when the environment does not
    /// exist. Never mutates the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime manager cannot be reached.
    fn list_installed<'a>(&'a self, env: &'a str)
        -> PortFuture<'a, Option<Vec<InstalledPackage>>>;

    /// Creates an empty environment.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    fn create_environment<'a>(&'a self, env: &'a str) -> PortFuture<'a, ()>;

    /// Deletes the environment and everything installed in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment does not exist or removal fails.
    fn delete_environment<'a>(&'a self, env: &'a str) -> PortFuture<'a, ()>;

    /// Applies installs and removals, reporting success or failure per item.
    ///
    /// # Errors
    ///
    /// Returns an error only when the manager cannot be invoked at all;
    /// per-package failures are reported in the outcomes.
    fn apply<'a>(
        &'a self,
        env: &'a str,
        changes: &'a ChangeSet,
    ) -> PortFuture<'a, Vec<ItemOutcome>>;
}
