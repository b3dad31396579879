//! Replaying adapter for the `PackageSolver` port.

use std::sync::Mutex;

use super::{next_output, replay_result};
use crate::cassette::replayer::CassetteReplayer;
use crate::ports::{PackageSolver, PortFuture, SolveRequest, SolveResponse};

/// Serves recorded solves from a cassette.
pub struct ReplayingPackageSolver {
    replayer: Mutex<CassetteReplayer>,
}

impl ReplayingPackageSolver {
    /// Creates a replaying solver from a cassette replayer.
    #[must_use]
    pub fn new(replayer: CassetteReplayer) -> Self {
        Self { replayer: Mutex::new(replayer) }
    }
}

impl PackageSolver for ReplayingPackageSolver {
    fn solve<'a>(&'a self, _request: &'a SolveRequest) -> PortFuture<'a, SolveResponse> {
        let output = next_output(&self.replayer, "solver", "solve");
        Box::pin(async move { replay_result(output) })
    }
}
