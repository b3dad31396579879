//! Cassette data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single recorded call on a port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    /// Sequence number, assigned by the recorder.
    pub seq: u64,
    /// Port name (`solver`, `runtime`, `index`, `clock`).
    pub port: String,
    /// Method invoked on the port.
    pub method: String,
    /// Arguments of the call.
    pub input: serde_json::Value,
    /// Value returned, using `{"Ok": ..}` / `{"Err": ..}` for fallible calls.
    pub output: serde_json::Value,
}

/// An ordered set of recorded interactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cassette {
    /// Human-readable name.
    pub name: String,
    /// When the cassette was written.
    pub recorded_at: DateTime<Utc>,
    /// Version of envops that recorded it.
    pub envops_version: String,
    /// Interactions in call order.
    pub interactions: Vec<Interaction>,
}
