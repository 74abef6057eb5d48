// ABOUTME: In-memory implementations of the store traits
// ABOUTME: Used by the test suite and for embedding the engine without external services

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{
    AuditEntry, AuditRow, AuditStore, MirrorRow, MirrorStore, SourceItem, SourcePage, SourceStore,
};
use crate::config::SourceKind;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Source store backed by ordered maps, one per path.
#[derive(Default)]
pub struct InMemorySourceStore {
    paths: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    failing: AtomicBool,
}

impl InMemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, id: &str, item: Value) {
        lock(&self.paths)
            .entry(path.to_string())
            .or_default()
            .insert(id.to_string(), item);
    }

    pub fn remove(&self, path: &str, id: &str) -> Option<Value> {
        lock(&self.paths).get_mut(path)?.remove(id)
    }

    pub fn clear(&self) {
        lock(&self.paths).clear();
    }

    /// Make every subsequent call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("source store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl SourceStore for InMemorySourceStore {
    async fn get_by_id(&self, _kind: SourceKind, path: &str, id: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(lock(&self.paths).get(path).and_then(|m| m.get(id)).cloned())
    }

    async fn scan_ordered(
        &self,
        _kind: SourceKind,
        path: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SourcePage> {
        self.check()?;
        let paths = lock(&self.paths);
        let Some(items) = paths.get(path) else {
            return Ok(SourcePage {
                is_last_page: true,
                ..SourcePage::default()
            });
        };

        let page: Vec<SourceItem> = items
            .iter()
            .filter(|(id, _)| cursor.map_or(true, |c| id.as_str() > c))
            .take(page_size)
            .map(|(id, item)| SourceItem {
                id: id.clone(),
                item: item.clone(),
            })
            .collect();

        Ok(SourcePage {
            next_cursor: page.last().map(|i| i.id.clone()),
            is_last_page: page.len() < page_size,
            items: page,
        })
    }
}

/// Mirror target backed by ordered maps, one per collection.
pub struct InMemoryMirrorStore {
    title: String,
    tables: Mutex<HashMap<String, BTreeMap<String, MirrorRow>>>,
    failing: AtomicBool,
}

impl InMemoryMirrorStore {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            tables: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn row(&self, collection: &str, id: &str) -> Option<MirrorRow> {
        lock(&self.tables).get(collection)?.get(id).cloned()
    }

    pub fn rows(&self, collection: &str) -> Vec<MirrorRow> {
        lock(&self.tables)
            .get(collection)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Overwrite a row's payload without touching its clock.
    pub fn set_item(&self, collection: &str, id: &str, item: Value) -> bool {
        match lock(&self.tables)
            .get_mut(collection)
            .and_then(|t| t.get_mut(id))
        {
            Some(row) => {
                row.item = item;
                true
            }
            None => false,
        }
    }

    /// Insert or replace a raw row.
    pub fn put_row(&self, collection: &str, row: MirrorRow) {
        lock(&self.tables)
            .entry(collection.to_string())
            .or_default()
            .insert(row.id.clone(), row);
    }

    pub fn remove_row(&self, collection: &str, id: &str) -> Option<MirrorRow> {
        lock(&self.tables).get_mut(collection)?.remove(id)
    }

    pub fn clear(&self) {
        lock(&self.tables).clear();
    }

    /// Make every subsequent call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("mirror target '{}' unavailable", self.title);
        }
        Ok(())
    }
}

#[async_trait]
impl MirrorStore for InMemoryMirrorStore {
    fn title(&self) -> &str {
        &self.title
    }

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<MirrorRow>> {
        self.check()?;
        Ok(self.row(collection, id))
    }

    async fn insert(&self, collection: &str, id: &str, item: &Value, clock: i64) -> Result<()> {
        self.check()?;
        let mut tables = lock(&self.tables);
        let table = tables.entry(collection.to_string()).or_default();
        if table.contains_key(id) {
            bail!(
                "duplicate key value violates unique constraint: mirror_{} id '{}'",
                collection,
                id
            );
        }
        table.insert(
            id.to_string(),
            MirrorRow {
                id: id.to_string(),
                item: item.clone(),
                updated_at: Utc::now(),
                last_sync_task_date_ms: clock,
                sweep_marker: None,
            },
        );
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, item: &Value, clock: i64) -> Result<()> {
        self.check()?;
        if let Some(row) = lock(&self.tables)
            .get_mut(collection)
            .and_then(|t| t.get_mut(id))
        {
            row.item = item.clone();
            row.updated_at = Utc::now();
            row.last_sync_task_date_ms = clock;
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<u64> {
        self.check()?;
        Ok(self.remove_row(collection, id).map_or(0, |_| 1))
    }

    async fn count_all(&self, collection: &str) -> Result<u64> {
        self.check()?;
        Ok(lock(&self.tables).get(collection).map_or(0, |t| t.len()) as u64)
    }

    async fn set_all_sweep_markers(&self, collection: &str, value: i64) -> Result<u64> {
        self.check()?;
        let mut tables = lock(&self.tables);
        let Some(table) = tables.get_mut(collection) else {
            return Ok(0);
        };
        for row in table.values_mut() {
            row.sweep_marker = Some(value);
        }
        Ok(table.len() as u64)
    }

    async fn clear_sweep_marker(&self, collection: &str, id: &str) -> Result<()> {
        self.check()?;
        if let Some(row) = lock(&self.tables)
            .get_mut(collection)
            .and_then(|t| t.get_mut(id))
        {
            row.sweep_marker = Some(0);
        }
        Ok(())
    }

    async fn scan_by_sweep_marker(&self, collection: &str, value: i64) -> Result<Vec<MirrorRow>> {
        self.check()?;
        Ok(lock(&self.tables)
            .get(collection)
            .map(|t| {
                t.values()
                    .filter(|row| row.sweep_marker == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Audit target backed by vectors, one per collection.
pub struct InMemoryAuditStore {
    title: String,
    tables: Mutex<HashMap<String, Vec<AuditRow>>>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl InMemoryAuditStore {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            tables: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            failing: AtomicBool::new(false),
        }
    }

    pub fn rows(&self, collection: &str) -> Vec<AuditRow> {
        lock(&self.tables)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn rows_for_item(&self, collection: &str, item_id: &str) -> Vec<AuditRow> {
        self.rows(collection)
            .into_iter()
            .filter(|row| row.item_id == item_id)
            .collect()
    }

    /// Shift every row of a collection `days` days into the past.
    pub fn backdate(&self, collection: &str, days: i64) {
        if let Some(rows) = lock(&self.tables).get_mut(collection) {
            for row in rows.iter_mut() {
                row.recorded_at -= ChronoDuration::days(days);
            }
        }
    }

    pub fn clear(&self) {
        lock(&self.tables).clear();
    }

    /// Make every subsequent call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("audit target '{}' unavailable", self.title);
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    fn title(&self) -> &str {
        &self.title
    }

    async fn append(&self, collection: &str, entry: &AuditEntry) -> Result<()> {
        self.check()?;
        let row = AuditRow {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            item_id: entry.item_id.clone(),
            before_item: entry.before_item.clone(),
            after_item: entry.after_item.clone(),
            action: entry.action,
            recorded_at: Utc::now(),
        };
        lock(&self.tables)
            .entry(collection.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    async fn delete_older_than(&self, collection: &str, days: u32) -> Result<u64> {
        self.check()?;
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        let mut tables = lock(&self.tables);
        let Some(rows) = tables.get_mut(collection) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| row.recorded_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_source_scan_pages_in_id_order() {
        let source = InMemorySourceStore::new();
        for id in ["c", "a", "e", "b", "d"] {
            source.put("person", id, json!({ "id": id }));
        }

        let first = source
            .scan_ordered(SourceKind::DocumentCollection, "person", None, 2)
            .await
            .unwrap();
        let ids: Vec<_> = first.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!first.is_last_page);

        let second = source
            .scan_ordered(
                SourceKind::DocumentCollection,
                "person",
                first.next_cursor.as_deref(),
                2,
            )
            .await
            .unwrap();
        let ids: Vec<_> = second.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);

        let third = source
            .scan_ordered(
                SourceKind::DocumentCollection,
                "person",
                second.next_cursor.as_deref(),
                2,
            )
            .await
            .unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.is_last_page);
    }

    #[tokio::test]
    async fn test_mirror_insert_rejects_duplicates() {
        let mirror = InMemoryMirrorStore::new("main_db");
        mirror.insert("person", "p1", &json!({"v": 1}), 100).await.unwrap();
        assert!(mirror.insert("person", "p1", &json!({"v": 2}), 110).await.is_err());
        assert_eq!(mirror.row("person", "p1").unwrap().last_sync_task_date_ms, 100);
    }

    #[tokio::test]
    async fn test_mirror_sweep_markers() {
        let mirror = InMemoryMirrorStore::new("main_db");
        mirror.insert("person", "a", &json!({}), 1).await.unwrap();
        mirror.insert("person", "b", &json!({}), 1).await.unwrap();

        assert_eq!(mirror.set_all_sweep_markers("person", 42).await.unwrap(), 2);
        mirror.clear_sweep_marker("person", "a").await.unwrap();

        let orphans = mirror.scan_by_sweep_marker("person", 42).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "b");
    }

    #[tokio::test]
    async fn test_audit_retention() {
        let audit = InMemoryAuditStore::new("backup_db");
        let entry = AuditEntry {
            item_id: "p1".to_string(),
            before_item: json!({}),
            after_item: json!({"v": 1}),
            action: crate::sync::task::SyncAction::Create,
        };
        audit.append("person", &entry).await.unwrap();
        assert_eq!(audit.delete_older_than("person", 90).await.unwrap(), 0);

        audit.backdate("person", 100);
        assert_eq!(audit.delete_older_than("person", 90).await.unwrap(), 1);
        assert!(audit.rows("person").is_empty());
    }

    #[tokio::test]
    async fn test_failing_store_reports_errors() {
        let mirror = InMemoryMirrorStore::new("main_db");
        mirror.set_failing(true);
        assert!(mirror.count_all("person").await.is_err());
        mirror.set_failing(false);
        assert_eq!(mirror.count_all("person").await.unwrap(), 0);
    }
}
