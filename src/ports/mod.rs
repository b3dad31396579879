//! Port traits defining external boundaries.
//!
//! Each trait represents a boundary between the reconciliation core and an
//! external system (time, filesystem, subprocesses, the package solver, the
//! runtime manager, the package index). Implementations live in
//! `src/adapters/`.

pub mod clock;
pub mod filesystem;
pub mod index;
pub mod runtime;
pub mod shell;
pub mod solver;

use std::future::Future;
use std::pin::Pin;

use crate::error::PortError;

pub use clock::Clock;
pub use filesystem::FileSystem;
pub use index::{PackageIndex, ReleaseFile};
pub use runtime::{
    ChangeKind, ChangeSet, InstallItem, InstalledPackage, ItemOutcome, RuntimeManager,
};
pub use shell::{ShellExecutor, ShellOutput};
pub use solver::{PackageSolver, ResolvedPackage, SolveRequest, SolveResponse, SolverSettings};

/// Boxed future returned by async port methods, keeping the traits
/// dyn-compatible.
pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PortError>> + Send + 'a>>;
