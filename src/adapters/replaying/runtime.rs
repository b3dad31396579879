//! Replaying adapter for the `RuntimeManager` port.

use std::sync::Mutex;

use super::{next_output, replay_result};
use crate::cassette::replayer::CassetteReplayer;
use crate::ports::{ChangeSet, InstalledPackage, ItemOutcome, PortFuture, RuntimeManager};

/// Serves recorded runtime answers from a cassette.
pub struct ReplayingRuntimeManager {
    replayer: Mutex<CassetteReplayer>,
}

impl ReplayingRuntimeManager {
    /// Creates a replaying runtime manager from a cassette replayer.
    #[must_use]
    pub fn new(replayer: CassetteReplayer) -> Self {
        Self { replayer: Mutex::new(replayer) }
    }
}

impl RuntimeManager for ReplayingRuntimeManager {
    fn list_installed<'a>(
        &'a self,
        _env: &'a str,
    ) -> PortFuture<'a, Option<Vec<InstalledPackage>>> {
        let output = next_output(&self.replayer, "runtime", "list_installed");
        Box::pin(async move { replay_result(output) })
    }

    fn create_environment<'a>(&'a self, _env: &'a str) -> PortFuture<'a, ()> {
        let output = next_output(&self.replayer, "runtime", "create_environment");
        Box::pin(async move { replay_result(output) })
    }

    fn delete_environment<'a>(&'a self, _env: &'a str) -> PortFuture<'a, ()> {
        let output = next_output(&self.replayer, "runtime", "delete_environment");
        Box::pin(async move { replay_result(output) })
    }

    fn apply<'a>(
        &'a self,
        _env: &'a str,
        _changes: &'a ChangeSet,
    ) -> PortFuture<'a, Vec<ItemOutcome>> {
        let output = next_output(&self.replayer, "runtime", "apply");
        Box::pin(async move { replay_result(output) })
    }
}
