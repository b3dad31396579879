//! Recording adapters that capture interactions to cassettes.

pub mod clock;
pub mod index;
pub mod runtime;
pub mod solver;

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::cassette::recorder::CassetteRecorder;

pub use clock::RecordingClock;
pub use index::RecordingPackageIndex;
pub use runtime::RecordingRuntimeManager;
pub use solver::RecordingPackageSolver;

/// Record an interaction with a plain (non-`Result`) return value.
///
/// Mirror of `replaying::next_output`.
pub(crate) fn record_interaction<I, O>(
    recorder: &Arc<Mutex<CassetteRecorder>>,
    port: &str,
    method: &str,
    input: &I,
    output: &O,
) where
    I: Serialize,
    O: Serialize,
{
    let input_json = serde_json::to_value(input).unwrap_or_default();
    let output_json = serde_json::to_value(output).unwrap_or_default();

    let mut guard = recorder.lock().expect("recorder lock poisoned");
    guard.record(port, method, input_json, output_json);
}

/// Record a `Result<T, E>` interaction: `Ok(v)` as `{"Ok": v}` and `Err(e)`
/// as `{"Err": e.to_string()}`.
///
/// Mirror of `replaying::replay_result`.
pub(crate) fn record_result<T, E, I>(
    recorder: &Arc<Mutex<CassetteRecorder>>,
    port: &str,
    method: &str,
    input: &I,
    result: &Result<T, E>,
) where
    T: Serialize,
    E: std::fmt::Display,
    I: Serialize,
{
    let input_json = serde_json::to_value(input).unwrap_or_default();
    let output_json = match result {
        Ok(v) => serde_json::json!({ "Ok": serde_json::to_value(v).unwrap_or_default() }),
        Err(e) => serde_json::json!({ "Err": e.to_string() }),
    };

    let mut guard = recorder.lock().expect("recorder lock poisoned");
    guard.record(port, method, input_json, output_json);
}
