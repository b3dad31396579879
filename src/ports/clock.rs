//! Clock port for obtaining the current time.

use chrono::{DateTime, Utc};

/// Provides the current time.
///
/// Lock generation stamps and state-lock holder records read the time
/// through this port so replayed sessions are deterministic.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}
