// ABOUTME: Checks that one validator task is reflected on every mirror target
// ABOUTME: Any anomaly is reported and handed to the healer

use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::canonical::items_match;
use super::context::SyncContext;
use super::healer::heal_item;
use super::task::{SyncAction, SyncTaskValidator};
use crate::error::SyncError;
use crate::store::MirrorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    Consistent,
    /// Row carries a newer clock than the validator
    Superseded,
    Healed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CheckSummary {
    pub(crate) anomalies: usize,
    pub(crate) skipped: u64,
}

pub(crate) async fn check_task(ctx: &SyncContext, validator: &SyncTaskValidator) -> CheckSummary {
    let path = validator.collection_or_record_path.as_str();
    let expected = ctx.hooks.transform_opt(validator.after_item.as_ref(), path);

    let checks = ctx
        .mirrors
        .iter()
        .enumerate()
        .map(|(index, mirror)| check_target(ctx, index, mirror, validator, expected.as_ref()));
    let outcomes = join_all(checks).await;

    let summary = CheckSummary {
        anomalies: outcomes
            .iter()
            .filter(|o| **o == CheckOutcome::Healed)
            .count(),
        skipped: outcomes
            .iter()
            .filter(|o| **o == CheckOutcome::Superseded)
            .count() as u64,
    };

    if summary.anomalies > 0 {
        let item = match validator.action {
            SyncAction::Delete => json!({}),
            SyncAction::Create | SyncAction::Update => expected.unwrap_or_else(|| json!({})),
        };
        ctx.hooks
            .post_mirror(validator.action.hook_action(), item, path)
            .await;
    }
    summary
}

async fn check_target(
    ctx: &SyncContext,
    index: usize,
    mirror: &Arc<dyn MirrorStore>,
    validator: &SyncTaskValidator,
    expected: Option<&Value>,
) -> CheckOutcome {
    let path = validator.collection_or_record_path.as_str();
    let id = validator.id_or_key.as_str();

    let row = match mirror.get_by_id(path, id).await {
        Ok(row) => row,
        Err(source) => {
            ctx.report(&SyncError::TargetReadFailure {
                target: mirror.title().to_string(),
                path: path.to_string(),
                item_id: id.to_string(),
                source,
            });
            return CheckOutcome::Failed;
        }
    };

    let detail = match (validator.action, row) {
        (SyncAction::Delete, None) => None,
        (SyncAction::Delete, Some(_)) => Some("row still exists after delete".to_string()),
        (_, None) => Some("row is missing".to_string()),
        (_, Some(row)) if row.last_sync_task_date_ms > validator.date_ms => {
            debug!(
                "{}/{} on '{}' superseded by clock {}",
                path,
                id,
                mirror.title(),
                row.last_sync_task_date_ms
            );
            return CheckOutcome::Superseded;
        }
        (_, Some(row)) if row.last_sync_task_date_ms < validator.date_ms => Some(format!(
            "row clock {} is behind {}",
            row.last_sync_task_date_ms, validator.date_ms
        )),
        (_, Some(row)) => {
            let matches = expected.map_or(false, |item| items_match(item, &row.item));
            (!matches).then(|| "row item does not match the expected item".to_string())
        }
    };

    let Some(detail) = detail else {
        return CheckOutcome::Consistent;
    };

    ctx.report(&SyncError::UnexpectedMirrorState {
        target: mirror.title().to_string(),
        path: path.to_string(),
        item_id: id.to_string(),
        detail,
    });
    heal_item(ctx, path, id, validator.date_ms, index).await;
    CheckOutcome::Healed
}
