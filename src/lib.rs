// ABOUTME: Library root for mirror-sync
// ABOUTME: Keeps PostgreSQL mirrors and audit trails consistent with an authoritative document store

pub mod config;
pub mod error;
pub mod postgres;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod sync;
pub mod utils;

pub use config::{CollectionOrRecordPathMeta, EngineConfig, SourceKind};
pub use error::SyncError;
pub use reconcile::{FullValidationOptions, RunResult, RunStatus, TrimResult, TrimStatus};
pub use sync::{ItemState, SyncAction, SyncEngine, SyncTask, SyncTaskValidator};
