// ABOUTME: Re-derives the correct mirror state of one item from the source store
// ABOUTME: Repairs a single mirror target and classifies what it found

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use super::canonical::items_match;
use super::context::SyncContext;
use crate::error::SyncError;

/// Classification of one heal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemState {
    /// Source and mirror agree (both present and equal, or both absent)
    ItemsWereInExpectedState,
    /// Mirror row was overwritten with the source item
    ItemsDidNotMatch,
    /// Mirror row was inserted
    ItemWasMissingInMirror,
    /// Orphaned mirror row was deleted
    ItemWasNotDeletedInMirror,
    /// The heal failed; the state of the item is unknown
    HealIndeterminate,
}

impl ItemState {
    pub const ALL: [ItemState; 5] = [
        ItemState::ItemsWereInExpectedState,
        ItemState::ItemsDidNotMatch,
        ItemState::ItemWasMissingInMirror,
        ItemState::ItemWasNotDeletedInMirror,
        ItemState::HealIndeterminate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::ItemsWereInExpectedState => "ITEMS_WERE_IN_EXPECTED_STATE",
            ItemState::ItemsDidNotMatch => "ITEMS_DID_NOT_MATCH",
            ItemState::ItemWasMissingInMirror => "ITEM_WAS_MISSING_IN_MIRROR",
            ItemState::ItemWasNotDeletedInMirror => "ITEM_WAS_NOT_DELETED_IN_MIRROR",
            ItemState::HealIndeterminate => "HEAL_INDETERMINATE",
        }
    }

    /// True for every state other than "in expected state".
    pub fn is_anomaly(&self) -> bool {
        *self != ItemState::ItemsWereInExpectedState
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heal `id` of `path` on the mirror target at index `target`.
///
/// Failures are reported to the error sink and yield
/// [`ItemState::HealIndeterminate`].
pub(crate) async fn heal_item(
    ctx: &SyncContext,
    path: &str,
    id: &str,
    date_ms: i64,
    target: usize,
) -> ItemState {
    match try_heal(ctx, path, id, date_ms, target).await {
        Ok(state) => state,
        Err(e) => {
            ctx.report(&e);
            ItemState::HealIndeterminate
        }
    }
}

async fn try_heal(
    ctx: &SyncContext,
    path: &str,
    id: &str,
    date_ms: i64,
    target: usize,
) -> Result<ItemState, SyncError> {
    let kind = ctx
        .registry
        .source_kind(path)
        .ok_or_else(|| SyncError::UnregisteredPath {
            path: path.to_string(),
        })?;
    let mirror = ctx.mirrors.get(target).ok_or_else(|| SyncError::HealFailure {
        target: format!("#{}", target),
        path: path.to_string(),
        item_id: id.to_string(),
        source: anyhow::anyhow!(
            "no mirror target at index {} ({} configured)",
            target,
            ctx.mirrors.len()
        ),
    })?;
    let title = mirror.title();

    let source_fetch = async {
        ctx.source
            .get_by_id(kind, path, id)
            .await
            .map_err(|source| SyncError::SourceFetchFailure {
                path: path.to_string(),
                item_id: id.to_string(),
                source,
            })
    };
    let mirror_fetch = async {
        mirror
            .get_by_id(path, id)
            .await
            .map_err(|source| SyncError::TargetReadFailure {
                target: title.to_string(),
                path: path.to_string(),
                item_id: id.to_string(),
                source,
            })
    };
    let (source_item, mirror_row) = futures::try_join!(source_fetch, mirror_fetch)?;
    let source_item = source_item.map(|item| ctx.hooks.transform(item, path));

    let heal_failure = |source: anyhow::Error| SyncError::HealFailure {
        target: title.to_string(),
        path: path.to_string(),
        item_id: id.to_string(),
        source,
    };

    let state = match (source_item, mirror_row) {
        (Some(item), Some(row)) => {
            if items_match(&item, &row.item) {
                ItemState::ItemsWereInExpectedState
            } else {
                // Never move the row's clock backwards
                let clock = row.last_sync_task_date_ms.max(date_ms);
                mirror
                    .update(path, id, &item, clock)
                    .await
                    .map_err(heal_failure)?;
                ItemState::ItemsDidNotMatch
            }
        }
        (Some(item), None) => {
            mirror
                .insert(path, id, &item, date_ms)
                .await
                .map_err(heal_failure)?;
            ItemState::ItemWasMissingInMirror
        }
        (None, Some(_)) => {
            mirror.delete(path, id).await.map_err(heal_failure)?;
            ItemState::ItemWasNotDeletedInMirror
        }
        (None, None) => ItemState::ItemsWereInExpectedState,
    };

    if state.is_anomaly() {
        info!("Healed {}/{} on '{}': {}", path, id, title, state);
    } else {
        debug!("{}/{} on '{}' already consistent", path, id, title);
    }
    Ok(state)
}
