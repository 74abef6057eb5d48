// ABOUTME: Applies one sync task to every mirror target and every audit target
// ABOUTME: Write conflicts are resolved with the task's logical clock

use anyhow::anyhow;
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::context::SyncContext;
use super::task::{SyncAction, SyncTask};
use crate::error::SyncError;
use crate::store::{AuditEntry, AuditStore, MirrorStore};

/// What happened on one mirror target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetOutcome {
    Applied,
    /// Row already carries a newer clock
    Skipped,
    /// Create found an existing row, or delete found none
    Unchanged,
    Failed,
}

/// Aggregate of a task applied to all targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WriteSummary {
    pub(crate) applied: usize,
    pub(crate) skipped: u64,
}

pub(crate) async fn apply_task(ctx: &SyncContext, task: &SyncTask) -> WriteSummary {
    let path = task.collection_or_record_path.as_str();
    let after = ctx.hooks.transform_opt(task.after_item.as_ref(), path);
    let before = ctx.hooks.transform_opt(task.before_item.as_ref(), path);

    let mirror_writes = ctx
        .mirrors
        .iter()
        .map(|mirror| write_mirror(ctx, mirror, task, after.as_ref()));
    let audit_entry = AuditEntry {
        item_id: task.id_or_key.clone(),
        before_item: before.clone().unwrap_or_else(|| json!({})),
        after_item: after.clone().unwrap_or_else(|| json!({})),
        action: task.action,
    };
    let audit_writes = ctx
        .audits
        .iter()
        .map(|audit| write_audit(ctx, audit, task, &audit_entry));

    let (outcomes, _) = futures::join!(join_all(mirror_writes), join_all(audit_writes));

    let summary = WriteSummary {
        applied: outcomes
            .iter()
            .filter(|o| **o == TargetOutcome::Applied)
            .count(),
        skipped: outcomes
            .iter()
            .filter(|o| **o == TargetOutcome::Skipped)
            .count() as u64,
    };

    if summary.applied > 0 {
        let item = match task.action {
            SyncAction::Delete => before,
            SyncAction::Create | SyncAction::Update => after,
        };
        ctx.hooks
            .post_mirror(
                task.action.hook_action(),
                item.unwrap_or_else(|| json!({})),
                path,
            )
            .await;
    }
    summary
}

async fn write_mirror(
    ctx: &SyncContext,
    mirror: &Arc<dyn MirrorStore>,
    task: &SyncTask,
    after: Option<&Value>,
) -> TargetOutcome {
    match try_write_mirror(mirror.as_ref(), task, after).await {
        Ok(outcome) => outcome,
        Err(source) => {
            ctx.report(&SyncError::TargetWriteFailure {
                target: mirror.title().to_string(),
                path: task.collection_or_record_path.clone(),
                item_id: task.id_or_key.clone(),
                source,
            });
            TargetOutcome::Failed
        }
    }
}

async fn try_write_mirror(
    mirror: &dyn MirrorStore,
    task: &SyncTask,
    after: Option<&Value>,
) -> anyhow::Result<TargetOutcome> {
    let path = task.collection_or_record_path.as_str();
    let id = task.id_or_key.as_str();

    if task.action == SyncAction::Delete {
        let removed = mirror.delete(path, id).await?;
        if removed == 0 {
            debug!("{}/{} not present on '{}', delete is a no-op", path, id, mirror.title());
            return Ok(TargetOutcome::Unchanged);
        }
        return Ok(TargetOutcome::Applied);
    }

    let item = after.ok_or_else(|| anyhow!("{} task has no afterItem", task.action.as_str()))?;
    let existing = mirror.get_by_id(path, id).await?;

    match (task.action, existing) {
        (SyncAction::Create, Some(_)) => {
            debug!(
                "{}/{} already exists on '{}', create is a no-op",
                path,
                id,
                mirror.title()
            );
            Ok(TargetOutcome::Unchanged)
        }
        (_, None) => {
            mirror.insert(path, id, item, task.date_ms).await?;
            Ok(TargetOutcome::Applied)
        }
        (_, Some(row)) if row.last_sync_task_date_ms > task.date_ms => {
            debug!(
                "{}/{} on '{}' carries clock {} newer than {}, skipping",
                path,
                id,
                mirror.title(),
                row.last_sync_task_date_ms,
                task.date_ms
            );
            Ok(TargetOutcome::Skipped)
        }
        (_, Some(_)) => {
            mirror.update(path, id, item, task.date_ms).await?;
            Ok(TargetOutcome::Applied)
        }
    }
}

async fn write_audit(
    ctx: &SyncContext,
    audit: &Arc<dyn AuditStore>,
    task: &SyncTask,
    entry: &AuditEntry,
) {
    if let Err(source) = audit
        .append(&task.collection_or_record_path, entry)
        .await
    {
        ctx.report(&SyncError::TargetWriteFailure {
            target: audit.title().to_string(),
            path: task.collection_or_record_path.clone(),
            item_id: task.id_or_key.clone(),
            source,
        });
    }
}
