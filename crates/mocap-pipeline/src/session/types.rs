//! Step log of an initializer.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One step run: when, which step, and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    /// Step name, e.g. `"pivot_joint_centers"`.
    pub operation: String,
    pub success: bool,
    /// Summary on success, error message on failure.
    pub notes: Option<String>,
}

impl LogEntry {
    fn new(operation: impl Into<String>, success: bool, notes: Option<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success,
            notes,
        }
    }

    pub fn success(operation: impl Into<String>) -> Self {
        Self::new(operation, true, None)
    }

    pub fn success_with_notes(operation: impl Into<String>, notes: impl Into<String>) -> Self {
        Self::new(operation, true, Some(notes.into()))
    }

    pub fn failure(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(operation, false, Some(error.into()))
    }
}

/// Wall-clock seconds since the epoch; 0 if the clock is set before it.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
