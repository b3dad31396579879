//! Package-index port used to enrich pip lock entries with artifact hashes.

use serde::{Deserialize, Serialize};

use super::PortFuture;

/// A downloadable artifact of one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    /// Artifact file name.
    pub filename: String,
    /// Download URL.
    pub url: String,
    /// Hex SHA-256 digest.
    pub sha256: String,
    /// `bdist_wheel` or `sdist`.
    pub packagetype: String,
}

/// Looks up release artifacts on a package index.
pub trait PackageIndex: Send + Sync {
    /// Lists the artifacts published for `name` at `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is unreachable or the release is unknown.
    fn release_files<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
    ) -> PortFuture<'a, Vec<ReleaseFile>>;
}
