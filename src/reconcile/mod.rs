// ABOUTME: Full-corpus reconciliation and audit retention
// ABOUTME: Driven through SyncEngine::run_full_validation and SyncEngine::trim_audits

pub mod progress;
pub mod result;
pub(crate) mod scanner;
pub(crate) mod trim;

pub use progress::{ScanProgress, ScanProgressCallback};
pub use result::{RunResult, RunStatus, RunTotals, TrimResult, TrimStatus, ValidationResults};
pub use scanner::{
    FullValidationOptions, ProcessingErrorCallback, ValidationErrorCallback, ValidationIssue,
};
pub use trim::TrimProgressCallback;
