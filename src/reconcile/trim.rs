// ABOUTME: Retention trimming of audit tables
// ABOUTME: One failing target marks the result as an error but does not stop the others

use std::sync::Arc;
use tracing::{error, info};

use super::result::{TrimResult, TrimStatus};
use crate::error::SyncError;
use crate::sync::SyncContext;

pub type TrimProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub(crate) async fn trim_audits(
    ctx: &SyncContext,
    paths: &[String],
    days_to_retain: u32,
    progress: Option<TrimProgressCallback>,
) -> TrimResult {
    let emit = |message: &str| {
        if let Some(progress) = &progress {
            progress(message);
        }
    };

    let unregistered: Vec<SyncError> = paths
        .iter()
        .filter(|p| !ctx.registry.contains(p))
        .map(|p| SyncError::UnregisteredPath { path: p.clone() })
        .collect();
    if !unregistered.is_empty() {
        let errors: Vec<String> = unregistered
            .iter()
            .map(|e| {
                ctx.report(e);
                e.to_string()
            })
            .collect();
        emit(&format!("Aborting audit trim: {}", errors.join("; ")));
        return TrimResult {
            status: TrimStatus::Error,
            rows_deleted: 0,
            errors,
        };
    }

    let mut result = TrimResult {
        status: TrimStatus::Success,
        rows_deleted: 0,
        errors: Vec::new(),
    };
    for path in paths {
        for audit in &ctx.audits {
            emit(&format!(
                "Trimming audits of '{}' on '{}' older than {} days",
                path,
                audit.title(),
                days_to_retain
            ));
            match audit.delete_older_than(path, days_to_retain).await {
                Ok(deleted) => {
                    info!(
                        "Trimmed {} audit row(s) of '{}' on '{}'",
                        deleted,
                        path,
                        audit.title()
                    );
                    result.rows_deleted += deleted;
                }
                Err(e) => {
                    let message = format!(
                        "Failed to trim audits of '{}' on '{}': {:#}",
                        path,
                        audit.title(),
                        e
                    );
                    error!("{}", message);
                    emit(&message);
                    result.status = TrimStatus::Error;
                    result.errors.push(message);
                }
            }
        }
    }
    emit("Audit trim complete");
    result
}
