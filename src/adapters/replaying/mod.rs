//! Replaying adapters that serve recorded interactions.
//!
//! Replay is test tooling: a cassette that does not match the calls made
//! panics with the offending port and method.

pub mod clock;
pub mod index;
pub mod runtime;
pub mod solver;

use std::sync::Mutex;

use serde::de::DeserializeOwned;

use crate::cassette::replayer::CassetteReplayer;
use crate::error::PortError;

pub use clock::ReplayingClock;
pub use index::ReplayingPackageIndex;
pub use runtime::ReplayingRuntimeManager;
pub use solver::ReplayingPackageSolver;

/// Takes the output of the next `port`/`method` interaction.
pub(crate) fn next_output(
    replayer: &Mutex<CassetteReplayer>,
    port: &str,
    method: &str,
) -> serde_json::Value {
    let mut replayer = replayer.lock().expect("replayer lock poisoned");
    replayer.next_interaction(port, method).output.clone()
}

/// Decodes a recorded `{"Ok": v}` / `{"Err": msg}` output.
///
/// # Panics
///
/// Panics if the output has neither key or `v` does not decode as `T`.
pub(crate) fn replay_result<T: DeserializeOwned>(output: serde_json::Value) -> Result<T, PortError> {
    if let Some(err) = output.get("Err") {
        return Err(err.as_str().unwrap_or("unknown error").to_string().into());
    }
    let value = output
        .get("Ok")
        .cloned()
        .unwrap_or_else(|| panic!("recorded output is neither Ok nor Err: {output}"));
    Ok(serde_json::from_value(value)
        .unwrap_or_else(|e| panic!("recorded Ok value does not decode: {e}")))
}
