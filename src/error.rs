// ABOUTME: Error kinds reported by the sync engine to the injected error handler
// ABOUTME: Per-target and per-item failures are reported, never propagated

use thiserror::Error;

/// Errors observed by the engine.
///
/// Apart from [`SyncError::InvalidConfig`], none of these escape an engine
/// operation: they are counted in `totalErrors`, logged, and handed to the
/// error handler supplied at construction.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A task or request named a path that is not in the registry.
    #[error("collection or record path '{path}' is not registered")]
    UnregisteredPath { path: String },

    /// Writing to one mirror or audit target failed.
    #[error("failed to write {item_id} of '{path}' to target '{target}'")]
    TargetWriteFailure {
        target: String,
        path: String,
        item_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Reading the current row from one mirror target failed.
    #[error("failed to read {item_id} of '{path}' from target '{target}'")]
    TargetReadFailure {
        target: String,
        path: String,
        item_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A validator found a mirror row that does not reflect the expected mutation.
    #[error("unexpected mirror state for {item_id} of '{path}' on target '{target}': {detail}")]
    UnexpectedMirrorState {
        target: String,
        path: String,
        item_id: String,
        detail: String,
    },

    /// Healing one item on one mirror target failed.
    #[error("failed to heal {item_id} of '{path}' on target '{target}'")]
    HealFailure {
        target: String,
        path: String,
        item_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The authoritative item could not be read from the source store.
    #[error("failed to fetch {item_id} of '{path}' from the source store")]
    SourceFetchFailure {
        path: String,
        item_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A fatal error that aborted a full validation run.
    #[error("full validation of '{path}' aborted")]
    ScanFailure {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Construction-time validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::UnregisteredPath { .. } => "unregistered_path",
            SyncError::TargetWriteFailure { .. } => "target_write_failure",
            SyncError::TargetReadFailure { .. } => "target_read_failure",
            SyncError::UnexpectedMirrorState { .. } => "unexpected_mirror_state",
            SyncError::HealFailure { .. } => "heal_failure",
            SyncError::SourceFetchFailure { .. } => "source_fetch_failure",
            SyncError::ScanFailure { .. } => "scan_failure",
            SyncError::InvalidConfig(_) => "invalid_config",
        }
    }
}
