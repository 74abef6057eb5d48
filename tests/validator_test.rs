// ABOUTME: Integration tests for validator tasks and the single-item healer
// ABOUTME: Anomalies must be reported, healed from the source, and never move clocks backwards

mod common;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use common::{harness, person, task, transform, Harness, PERSON};
use mirror_sync::config::{CollectionOrRecordPathMeta, EngineConfig, SourceKind};
use mirror_sync::store::memory::{InMemoryMirrorStore, InMemorySourceStore};
use mirror_sync::store::{MirrorRow, MirrorStore};
use mirror_sync::sync::{ItemState, MirrorHookAction, SyncAction, SyncEngine, SyncTask};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

async fn mirror_task(h: &Harness, task: &SyncTask) {
    if let Some(item) = &task.after_item {
        h.source
            .put(&task.collection_or_record_path, &task.id_or_key, item.clone());
    }
    h.engine.submit_sync_tasks(vec![task.clone()]);
    h.engine.drain_sync_queue().await;
}

#[tokio::test]
async fn test_consistent_mirrors_pass_validation() {
    let h = harness();
    let create = task(SyncAction::Create, PERSON, "p1", None, Some(person("p1", 1)), 100);
    mirror_task(&h, &create).await;

    h.engine.submit_validator_tasks(vec![create.validator()]);
    h.engine.drain_validator_queue().await;

    let stats = h.engine.stats();
    assert_eq!(stats.total_errors, 0);
    assert_eq!(stats.total_validator_tasks_processed, 1);
    assert_eq!(h.post_mirror_count(), 1);
}

#[tokio::test]
async fn test_missing_rows_are_reported_and_reinserted() {
    let h = harness();
    let create = task(SyncAction::Create, PERSON, "p1", None, Some(person("p1", 1)), 100);
    mirror_task(&h, &create).await;
    let hooks_before = h.post_mirror_count();

    h.main_db.remove_row(PERSON, "p1");
    h.backup_db.remove_row(PERSON, "p1");

    h.engine.submit_validator_tasks(vec![create.validator()]);
    h.engine.drain_validator_queue().await;

    // One anomaly per mirror target
    assert_eq!(h.engine.stats().total_errors, 2);
    assert_eq!(
        h.error_kinds(),
        vec!["unexpected_mirror_state", "unexpected_mirror_state"]
    );
    for mirror in h.mirrors() {
        let row = mirror.row(PERSON, "p1").expect("row healed");
        assert_eq!(row.item, transform(person("p1", 1), PERSON));
        assert_eq!(row.last_sync_task_date_ms, 100);
    }
    // One post-mirror call for the whole validator task
    assert_eq!(h.post_mirror_count(), hooks_before + 1);
}

#[tokio::test]
async fn test_mismatched_row_is_overwritten_from_source() {
    let h = harness();
    let create = task(SyncAction::Create, PERSON, "p1", None, Some(person("p1", 1)), 100);
    mirror_task(&h, &create).await;

    h.backup_db
        .set_item(PERSON, "p1", json!({"id": "p1", "corrupted": true}));

    h.engine.submit_validator_tasks(vec![create.validator()]);
    h.engine.drain_validator_queue().await;

    assert_eq!(h.engine.stats().total_errors, 1);
    let row = h.backup_db.row(PERSON, "p1").unwrap();
    assert_eq!(row.item, transform(person("p1", 1), PERSON));
    assert_eq!(row.last_sync_task_date_ms, 100);
}

#[tokio::test]
async fn test_newer_mirror_row_supersedes_validator() {
    let h = harness();
    let create = task(SyncAction::Create, PERSON, "p1", None, Some(person("p1", 1)), 100);
    mirror_task(&h, &create).await;
    let update = task(SyncAction::Update, PERSON, "p1", None, Some(person("p1", 2)), 200);
    mirror_task(&h, &update).await;

    h.engine.submit_validator_tasks(vec![create.validator()]);
    h.engine.drain_validator_queue().await;

    let stats = h.engine.stats();
    assert_eq!(stats.total_errors, 0);
    assert_eq!(stats.total_validator_tasks_skipped, 2);
    assert_eq!(h.main_db.row(PERSON, "p1").unwrap().item["v"], 2);
}

#[tokio::test]
async fn test_row_behind_validator_clock_is_healed() {
    let h = harness();
    h.source.put(PERSON, "p1", person("p1", 2));
    for mirror in h.mirrors() {
        mirror.put_row(
            PERSON,
            MirrorRow {
                id: "p1".to_string(),
                item: transform(person("p1", 1), PERSON),
                updated_at: Utc::now(),
                last_sync_task_date_ms: 100,
                sweep_marker: None,
            },
        );
    }

    let update = task(SyncAction::Update, PERSON, "p1", None, Some(person("p1", 2)), 150);
    h.engine.submit_validator_tasks(vec![update.validator()]);
    h.engine.drain_validator_queue().await;

    assert_eq!(h.engine.stats().total_errors, 2);
    for mirror in h.mirrors() {
        let row = mirror.row(PERSON, "p1").unwrap();
        assert_eq!(row.item["v"], 2);
        assert_eq!(row.last_sync_task_date_ms, 150);
    }
}

#[tokio::test]
async fn test_delete_validator_removes_leftover_rows() {
    let h = harness();
    let create = task(SyncAction::Create, PERSON, "p1", None, Some(person("p1", 1)), 100);
    mirror_task(&h, &create).await;

    // The source no longer has the item but the delete never reached the mirrors
    h.source.remove(PERSON, "p1");
    let delete = task(SyncAction::Delete, PERSON, "p1", Some(person("p1", 1)), None, 200);
    h.engine.submit_validator_tasks(vec![delete.validator()]);
    h.engine.drain_validator_queue().await;

    assert_eq!(h.engine.stats().total_errors, 2);
    assert!(h.main_db.row(PERSON, "p1").is_none());
    assert!(h.backup_db.row(PERSON, "p1").is_none());

    let events = h.post_mirror_events.lock().unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.action, MirrorHookAction::Delete);
    assert_eq!(last.item, json!({}));
}

#[tokio::test]
async fn test_heal_is_idempotent() {
    let h = harness();
    h.source.put(PERSON, "p1", person("p1", 1));

    let first = h.engine.heal(PERSON, "p1", 100, 0).await;
    let second = h.engine.heal(PERSON, "p1", 100, 0).await;

    assert_eq!(first, ItemState::ItemWasMissingInMirror);
    assert_eq!(second, ItemState::ItemsWereInExpectedState);
    assert_eq!(
        h.main_db.row(PERSON, "p1").unwrap().item,
        transform(person("p1", 1), PERSON)
    );
    // Only the requested target is touched
    assert!(h.backup_db.row(PERSON, "p1").is_none());
}

#[tokio::test]
async fn test_heal_never_moves_clock_backwards() {
    let h = harness();
    h.source.put(PERSON, "p1", person("p1", 2));
    h.main_db.put_row(
        PERSON,
        MirrorRow {
            id: "p1".to_string(),
            item: transform(person("p1", 1), PERSON),
            updated_at: Utc::now(),
            last_sync_task_date_ms: 500,
            sweep_marker: None,
        },
    );

    let state = h.engine.heal(PERSON, "p1", 100, 0).await;

    assert_eq!(state, ItemState::ItemsDidNotMatch);
    let row = h.main_db.row(PERSON, "p1").unwrap();
    assert_eq!(row.item["v"], 2);
    assert_eq!(row.last_sync_task_date_ms, 500);
}

#[tokio::test]
async fn test_heal_removes_orphaned_row() {
    let h = harness();
    h.backup_db.put_row(
        PERSON,
        MirrorRow {
            id: "gone".to_string(),
            item: json!({"id": "gone"}),
            updated_at: Utc::now(),
            last_sync_task_date_ms: 1,
            sweep_marker: None,
        },
    );

    let state = h.engine.heal(PERSON, "gone", 10, 1).await;

    assert_eq!(state, ItemState::ItemWasNotDeletedInMirror);
    assert!(h.backup_db.row(PERSON, "gone").is_none());
}

#[tokio::test]
async fn test_heal_failure_is_indeterminate() {
    let h = harness();
    h.source.put(PERSON, "p1", person("p1", 1));
    h.source.set_failing(true);

    let state = h.engine.heal(PERSON, "p1", 100, 0).await;

    assert_eq!(state, ItemState::HealIndeterminate);
    assert_eq!(h.engine.stats().total_errors, 1);
    assert_eq!(h.error_kinds(), vec!["source_fetch_failure"]);
    assert!(h.main_db.row(PERSON, "p1").is_none());
}

#[tokio::test]
async fn test_heal_unknown_target_is_indeterminate() {
    let h = harness();
    h.source.put(PERSON, "p1", person("p1", 1));

    let state = h.engine.heal(PERSON, "p1", 100, 7).await;

    assert_eq!(state, ItemState::HealIndeterminate);
    assert_eq!(h.error_kinds(), vec!["heal_failure"]);
}

/// Mirror whose point reads of one id stall, keeping validators for it in flight.
struct SlowReadMirror {
    inner: Arc<InMemoryMirrorStore>,
    slow_id: &'static str,
    delay: Duration,
}

#[async_trait]
impl MirrorStore for SlowReadMirror {
    fn title(&self) -> &str {
        self.inner.title()
    }

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<MirrorRow>> {
        if id == self.slow_id {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.get_by_id(collection, id).await
    }

    async fn insert(&self, collection: &str, id: &str, item: &Value, clock: i64) -> Result<()> {
        self.inner.insert(collection, id, item, clock).await
    }

    async fn update(&self, collection: &str, id: &str, item: &Value, clock: i64) -> Result<()> {
        self.inner.update(collection, id, item, clock).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<u64> {
        self.inner.delete(collection, id).await
    }

    async fn count_all(&self, collection: &str) -> Result<u64> {
        self.inner.count_all(collection).await
    }

    async fn set_all_sweep_markers(&self, collection: &str, value: i64) -> Result<u64> {
        self.inner.set_all_sweep_markers(collection, value).await
    }

    async fn clear_sweep_marker(&self, collection: &str, id: &str) -> Result<()> {
        self.inner.clear_sweep_marker(collection, id).await
    }

    async fn scan_by_sweep_marker(&self, collection: &str, value: i64) -> Result<Vec<MirrorRow>> {
        self.inner.scan_by_sweep_marker(collection, value).await
    }
}

#[tokio::test]
async fn test_validator_gate_drops_stale_and_retries_busy_keys() {
    let item = json!({"id": "slow", "v": 1});
    let source = Arc::new(InMemorySourceStore::new());
    source.put(PERSON, "slow", item.clone());
    let inner = Arc::new(InMemoryMirrorStore::new("main_db"));
    inner.put_row(
        PERSON,
        MirrorRow {
            id: "slow".to_string(),
            item: item.clone(),
            updated_at: Utc::now(),
            last_sync_task_date_ms: 200,
            sweep_marker: None,
        },
    );
    let engine = SyncEngine::builder(source.clone())
        .mirror(Arc::new(SlowReadMirror {
            inner: inner.clone(),
            slow_id: "slow",
            delay: Duration::from_millis(500),
        }))
        .config(EngineConfig {
            retry_backoff: Duration::from_millis(300),
            paths: vec![CollectionOrRecordPathMeta::new(
                PERSON,
                SourceKind::DocumentCollection,
            )],
            ..EngineConfig::default()
        })
        .build()
        .expect("engine config is valid");

    let validator = |date_ms| {
        task(SyncAction::Update, PERSON, "slow", None, Some(item.clone()), date_ms).validator()
    };

    // Holds the key while its mirror read stalls
    engine.submit_validator_tasks(vec![validator(200)]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.stats().validator_task_running_keys, 1);

    engine.submit_validator_tasks(vec![validator(100), validator(300)]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = engine.stats();
    assert_eq!(stats.total_validator_tasks_skipped, 1);
    assert_eq!(stats.total_validator_tasks_pending_retry, 1);

    // The sync pool has its own gate and drains while the validator is stuck
    engine.submit_sync_tasks(vec![task(
        SyncAction::Create,
        PERSON,
        "other",
        None,
        Some(json!({"id": "other"})),
        1,
    )]);
    tokio::time::timeout(Duration::from_millis(200), engine.drain_sync_queue())
        .await
        .expect("sync drain does not wait for validators");
    assert!(inner.row(PERSON, "other").is_some());
    let stats = engine.stats();
    assert_eq!(stats.total_sync_tasks_processed, 1);
    assert_eq!(stats.validator_task_running_keys, 1);
    assert!(stats.validator_tasks_currently_running >= 1);

    engine.drain_validator_queue().await;

    let stats = engine.stats();
    assert_eq!(stats.total_validator_tasks_processed, 2);
    assert_eq!(stats.total_validator_tasks_skipped, 1);
    assert_eq!(stats.total_validator_tasks_pending_retry, 0);
    assert_eq!(stats.validator_task_running_keys, 0);
    assert_eq!(stats.validator_tasks_waiting_in_queue, 0);
    // The newer validator found the row clock behind it and healed
    assert_eq!(stats.total_errors, 1);
}
