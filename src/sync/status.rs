//! Synchronizer phases and the user-facing status indicator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Internal synchronizer state.
///
/// `Unloaded -> Loading -> {Loaded, LoadError}`, with `Reconnecting` between
/// load attempts, and `Loaded -> Syncing -> {Loaded, SyncError}`.
/// `SyncError` is left on the next successful push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "detail", rename_all = "snake_case")]
pub enum SyncPhase {
    Unloaded,
    Loading,
    Reconnecting { attempt: u32, of: u32 },
    Loaded,
    /// Terminal for the session until a manual retry
    LoadError(String),
    Syncing,
    SyncError(String),
}

impl SyncPhase {
    pub fn is_loaded(&self) -> bool {
        matches!(
            self,
            SyncPhase::Loaded | SyncPhase::Syncing | SyncPhase::SyncError(_)
        )
    }
}

/// Tri-state indicator shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error(String),
}

impl From<&SyncPhase> for SyncStatus {
    fn from(phase: &SyncPhase) -> Self {
        match phase {
            SyncPhase::Unloaded | SyncPhase::Loaded => SyncStatus::Idle,
            SyncPhase::Loading | SyncPhase::Syncing => SyncStatus::Syncing,
            SyncPhase::Reconnecting { attempt, of } => SyncStatus::Error(format!(
                "Reconnecting to the remote store (attempt {} of {})",
                attempt + 1,
                of
            )),
            SyncPhase::LoadError(msg) => SyncStatus::Error(format!("Load failed: {}", msg)),
            SyncPhase::SyncError(msg) => SyncStatus::Error(format!("Out of sync: {}", msg)),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => f.write_str("synced"),
            SyncStatus::Syncing => f.write_str("syncing"),
            SyncStatus::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}
