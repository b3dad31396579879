//! Recording adapter for the `PackageSolver` port.

use std::sync::{Arc, Mutex};

use super::record_result;
use crate::cassette::recorder::CassetteRecorder;
use crate::ports::{PackageSolver, PortFuture, SolveRequest, SolveResponse};

/// Records solves while delegating to an inner solver.
pub struct RecordingPackageSolver {
    inner: Box<dyn PackageSolver>,
    recorder: Arc<Mutex<CassetteRecorder>>,
}

impl RecordingPackageSolver {
    /// Wraps `inner`, recording into `recorder`.
    pub fn new(inner: Box<dyn PackageSolver>, recorder: Arc<Mutex<CassetteRecorder>>) -> Self {
        Self { inner, recorder }
    }
}

impl PackageSolver for RecordingPackageSolver {
    fn solve<'a>(&'a self, request: &'a SolveRequest) -> PortFuture<'a, SolveResponse> {
        Box::pin(async move {
            let result = self.inner.solve(request).await;
            record_result(&self.recorder, "solver", "solve", request, &result);
            result
        })
    }
}
