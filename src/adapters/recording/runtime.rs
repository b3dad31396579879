//! Recording adapter for the `RuntimeManager` port.

use std::sync::{Arc, Mutex};

use serde_json::json;

use super::record_result;
use crate::cassette::recorder::CassetteRecorder;
use crate::ports::{ChangeSet, InstalledPackage, ItemOutcome, PortFuture, RuntimeManager};

/// Records runtime queries and changes while delegating to an inner manager.
pub struct RecordingRuntimeManager {
    inner: Box<dyn RuntimeManager>,
    recorder: Arc<Mutex<CassetteRecorder>>,
}

impl RecordingRuntimeManager {
    /// Wraps `inner`, recording into `recorder`.
    pub fn new(inner: Box<dyn RuntimeManager>, recorder: Arc<Mutex<CassetteRecorder>>) -> Self {
        Self { inner, recorder }
    }
}

impl RuntimeManager for RecordingRuntimeManager {
    fn list_installed<'a>(
        &'a self,
        env: &'a str,
    ) -> PortFuture<'a, Option<Vec<InstalledPackage>>> {
        Box::pin(async move {
            let result = self.inner.list_installed(env).await;
            record_result(&self.recorder, "runtime", "list_installed", &json!({"env": env}), &result);
            result
        })
    }

    fn create_environment<'a>(&'a self, env: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let result = self.inner.create_environment(env).await;
            record_result(
                &self.recorder,
                "runtime",
                "create_environment",
                &json!({"env": env}),
                &result,
            );
            result
        })
    }

    fn delete_environment<'a>(&'a self, env: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let result = self.inner.delete_environment(env).await;
            record_result(
                &self.recorder,
                "runtime",
                "delete_environment",
                &json!({"env": env}),
                &result,
            );
            result
        })
    }

    fn apply<'a>(
        &'a self,
        env: &'a str,
        changes: &'a ChangeSet,
    ) -> PortFuture<'a, Vec<ItemOutcome>> {
        Box::pin(async move {
            let result = self.inner.apply(env, changes).await;
            let input = json!({"env": env, "changes": changes});
            record_result(&self.recorder, "runtime", "apply", &input, &result);
            result
        })
    }
}
