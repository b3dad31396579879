//! Package-resolution engine port.

use serde::{Deserialize, Serialize};

use super::PortFuture;
use crate::reference::Manager;

/// Solver selection and channel handling, taken from project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Solver backend name (`classic` or `libmamba`).
    pub solver: String,
    /// Channel priority mode (`strict`, `flexible`, or `disabled`).
    pub channel_priority: String,
}

/// Input to a solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveRequest {
    /// Environment the solution is for.
    pub env_name: String,
    /// Channels in priority order.
    pub channels: Vec<String>,
    /// Channel-qualified conda specs, in channel priority order.
    pub conda_specs: Vec<String>,
    /// Pip requirement strings, in install order.
    pub pip_specs: Vec<String>,
    /// Solver configuration.
    pub settings: SolverSettings,
}

/// One pinned package in a solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    /// Owning manager.
    pub manager: Manager,
    /// Package name.
    pub name: String,
    /// Exact version.
    pub version: String,
    /// Source channel for conda packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Build string for conda packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Download URL of the artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Artifact hash as `<algorithm>:<hex>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// A complete solution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveResponse {
    /// Every package the environment should contain.
    pub packages: Vec<ResolvedPackage>,
}

/// Resolves requirements into an exact package set.
pub trait PackageSolver: Send + Sync {
    /// Solves `request` without modifying any environment.
    ///
    /// # Errors
    ///
    /// Returns the solver's diagnostic when the constraints are
    /// unsatisfiable or the solver cannot reach its channels.
    fn solve<'a>(&'a self, request: &'a SolveRequest) -> PortFuture<'a, SolveResponse>;
}
