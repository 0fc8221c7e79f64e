//! Canonical backup states.
//!
//! Raw state text reported by the engine is normalized here, once, and nowhere else.

use serde::{Deserialize, Serialize};
use std::fmt;

const ENGINE_STATE_IN_PROGRESS: &str = "in_progress";
const ENGINE_STATE_COMPLETE: &str = "complete";
const ENGINE_STATE_ERROR: &str = "error";

/// Observed lifecycle: `InProgress -> {Completed, Error}`.
///
/// `Unknown` is not terminal; callers keep polling until a recognized terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupState {
    InProgress,
    Completed,
    Error,
    Unknown,
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupState::InProgress => "InProgress",
            BackupState::Completed => "Completed",
            BackupState::Error => "Error",
            BackupState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Map the engine's state text to a canonical state. Total and deterministic.
pub fn convert_engine_backup_state(state: &str) -> BackupState {
    match state {
        ENGINE_STATE_IN_PROGRESS => BackupState::InProgress,
        ENGINE_STATE_COMPLETE => BackupState::Completed,
        ENGINE_STATE_ERROR => BackupState::Error,
        _ => BackupState::Unknown,
    }
}
