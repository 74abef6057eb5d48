// ABOUTME: Capability interfaces for the source store, mirror targets, and audit targets
// ABOUTME: The engine only talks to storage through these traits

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SourceKind;
use crate::sync::task::SyncAction;

/// One item read from the source store.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
    pub id: String,
    pub item: Value,
}

/// One page of an ordered source scan.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    /// Items in ascending id order
    pub items: Vec<SourceItem>,
    /// Cursor to pass to the next `scan_ordered` call
    pub next_cursor: Option<String>,
    pub is_last_page: bool,
}

/// Read access to the authoritative document store.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Point read. `Ok(None)` means the item does not exist.
    async fn get_by_id(&self, kind: SourceKind, path: &str, id: &str) -> Result<Option<Value>>;

    /// Ordered, paginated scan of a whole collection/path.
    ///
    /// `cursor` is the `next_cursor` of the previous page (`None` for the first page).
    async fn scan_ordered(
        &self,
        kind: SourceKind,
        path: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SourcePage>;
}

/// A row of a mirror table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorRow {
    pub id: String,
    pub item: Value,
    pub updated_at: DateTime<Utc>,
    /// Logical clock of the task that last wrote the row (0 if never written by a task)
    pub last_sync_task_date_ms: i64,
    pub sweep_marker: Option<i64>,
}

/// One relational replica kept in sync with the source.
///
/// Every method is scoped to one collection; implementations map the
/// collection to a table (`mirror_<collection>` for PostgreSQL).
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Human readable name used in logs and error events
    fn title(&self) -> &str;

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<MirrorRow>>;

    async fn insert(&self, collection: &str, id: &str, item: &Value, clock: i64) -> Result<()>;

    async fn update(&self, collection: &str, id: &str, item: &Value, clock: i64) -> Result<()>;

    /// Returns the number of rows removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<u64>;

    async fn count_all(&self, collection: &str) -> Result<u64>;

    /// Stamp every row with `value`. Returns the number of rows stamped.
    async fn set_all_sweep_markers(&self, collection: &str, value: i64) -> Result<u64>;

    /// Mark a row as seen (sweep marker 0).
    async fn clear_sweep_marker(&self, collection: &str, id: &str) -> Result<()>;

    async fn scan_by_sweep_marker(&self, collection: &str, value: i64) -> Result<Vec<MirrorRow>>;

    /// Create backing storage for a collection if needed.
    async fn ensure_collection(&self, _collection: &str) -> Result<()> {
        Ok(())
    }
}

/// Record appended to an audit target for every applied mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub item_id: String,
    /// Transformed before-image, `{}` when absent
    pub before_item: Value,
    /// Transformed after-image, `{}` when absent
    pub after_item: Value,
    pub action: SyncAction,
}

/// An audit row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow {
    pub id: i64,
    pub item_id: String,
    pub before_item: Value,
    pub after_item: Value,
    pub action: SyncAction,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only log of mutations.
#[async_trait]
pub trait AuditStore: Send + Sync {
    fn title(&self) -> &str;

    async fn append(&self, collection: &str, entry: &AuditEntry) -> Result<()>;

    /// Delete rows recorded more than `days` days ago. Returns the number removed.
    async fn delete_older_than(&self, collection: &str, days: u32) -> Result<u64>;

    async fn ensure_collection(&self, _collection: &str) -> Result<()> {
        Ok(())
    }
}
