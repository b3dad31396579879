//! Recording adapter for the `PackageIndex` port.

use std::sync::{Arc, Mutex};

use serde_json::json;

use super::record_result;
use crate::cassette::recorder::CassetteRecorder;
use crate::ports::{PackageIndex, PortFuture, ReleaseFile};

/// Records index lookups while delegating to an inner index.
pub struct RecordingPackageIndex {
    inner: Box<dyn PackageIndex>,
    recorder: Arc<Mutex<CassetteRecorder>>,
}

impl RecordingPackageIndex {
    /// Wraps `inner`, recording into `recorder`.
    pub fn new(inner: Box<dyn PackageIndex>, recorder: Arc<Mutex<CassetteRecorder>>) -> Self {
        Self { inner, recorder }
    }
}

impl PackageIndex for RecordingPackageIndex {
    fn release_files<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
    ) -> PortFuture<'a, Vec<ReleaseFile>> {
        Box::pin(async move {
            let result = self.inner.release_files(name, version).await;
            let input = json!({"name": name, "version": version});
            record_result(&self.recorder, "index", "release_files", &input, &result);
            result
        })
    }
}
