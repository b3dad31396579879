//! Replaying adapter for the `PackageIndex` port.

use std::sync::Mutex;

use super::{next_output, replay_result};
use crate::cassette::replayer::CassetteReplayer;
use crate::ports::{PackageIndex, PortFuture, ReleaseFile};

/// Serves recorded index lookups from a cassette.
pub struct ReplayingPackageIndex {
    replayer: Mutex<CassetteReplayer>,
}

impl ReplayingPackageIndex {
    /// Creates a replaying index from a cassette replayer.
    #[must_use]
    pub fn new(replayer: CassetteReplayer) -> Self {
        Self { replayer: Mutex::new(replayer) }
    }
}

impl PackageIndex for ReplayingPackageIndex {
    fn release_files<'a>(
        &'a self,
        _name: &'a str,
        _version: &'a str,
    ) -> PortFuture<'a, Vec<ReleaseFile>> {
        let output = next_output(&self.replayer, "index", "release_files");
        Box::pin(async move { replay_result(output) })
    }
}
