// ABOUTME: Integration tests for audit retention trimming
// ABOUTME: Old rows go, recent rows stay, and one failing target does not stop the others

mod common;

use common::{harness, person, task, Harness, DEVICE, PERSON};
use mirror_sync::config::{CollectionOrRecordPathMeta, EngineConfig, SourceKind};
use mirror_sync::reconcile::TrimStatus;
use mirror_sync::store::memory::{InMemoryAuditStore, InMemorySourceStore};
use mirror_sync::sync::{SyncAction, SyncEngine, SyncTask};
use serde_json::json;
use std::sync::{Arc, Mutex};

async fn apply(h: &Harness, tasks: Vec<SyncTask>) {
    h.engine.submit_sync_tasks(tasks);
    h.engine.drain_sync_queue().await;
}

#[tokio::test]
async fn test_rows_older_than_retention_are_deleted() {
    let h = harness();
    apply(
        &h,
        vec![
            task(SyncAction::Create, PERSON, "p1", None, Some(person("p1", 1)), 1),
            task(SyncAction::Create, PERSON, "p2", None, Some(person("p2", 1)), 2),
        ],
    )
    .await;
    h.audit_db.backdate(PERSON, 100);
    apply(
        &h,
        vec![task(
            SyncAction::Update,
            PERSON,
            "p1",
            None,
            Some(person("p1", 2)),
            3,
        )],
    )
    .await;
    assert_eq!(h.audit_db.rows(PERSON).len(), 3);

    let messages = Arc::new(Mutex::new(Vec::new()));
    let recorded = messages.clone();
    let result = h
        .engine
        .trim_audits(
            &[PERSON.to_string()],
            90,
            Some(Arc::new(move |message: &str| {
                recorded.lock().unwrap().push(message.to_string())
            })),
        )
        .await;

    assert_eq!(result.status, TrimStatus::Success);
    assert_eq!(result.rows_deleted, 2);
    assert!(result.errors.is_empty());

    let remaining = h.audit_db.rows(PERSON);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].after_item["v"], 2);
    assert!(!messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_recent_rows_survive() {
    let h = harness();
    apply(
        &h,
        vec![task(
            SyncAction::Create,
            DEVICE,
            "d1",
            None,
            Some(json!({"id": "d1"})),
            1,
        )],
    )
    .await;
    h.audit_db.backdate(DEVICE, 30);

    let result = h
        .engine
        .trim_audits(&[PERSON.to_string(), DEVICE.to_string()], 90, None)
        .await;

    assert!(result.is_success());
    assert_eq!(result.rows_deleted, 0);
    assert_eq!(h.audit_db.rows(DEVICE).len(), 1);
}

#[tokio::test]
async fn test_unregistered_path_aborts_before_trimming() {
    let h = harness();
    apply(
        &h,
        vec![task(SyncAction::Create, PERSON, "p1", None, Some(person("p1", 1)), 1)],
    )
    .await;
    h.audit_db.backdate(PERSON, 100);

    let result = h
        .engine
        .trim_audits(&[PERSON.to_string(), "invoice".to_string()], 90, None)
        .await;

    assert_eq!(result.status, TrimStatus::Error);
    assert_eq!(result.rows_deleted, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("invoice"));
    // The registered path was not touched either
    assert_eq!(h.audit_db.rows(PERSON).len(), 1);
    assert_eq!(h.error_kinds(), vec!["unregistered_path"]);
}

#[tokio::test]
async fn test_failing_target_is_reported_and_others_continue() {
    let primary = Arc::new(InMemoryAuditStore::new("main_db"));
    let secondary = Arc::new(InMemoryAuditStore::new("backup_db"));
    let engine = SyncEngine::builder(Arc::new(InMemorySourceStore::new()))
        .audit(primary.clone())
        .audit(secondary.clone())
        .config(EngineConfig {
            paths: vec![CollectionOrRecordPathMeta::new(
                PERSON,
                SourceKind::DocumentCollection,
            )],
            ..EngineConfig::default()
        })
        .build()
        .expect("engine config is valid");

    engine.submit_sync_tasks(vec![task(
        SyncAction::Create,
        PERSON,
        "p1",
        None,
        Some(person("p1", 1)),
        1,
    )]);
    engine.drain_sync_queue().await;
    primary.backdate(PERSON, 100);
    secondary.backdate(PERSON, 100);
    primary.set_failing(true);

    let result = engine.trim_audits(&[PERSON.to_string()], 90, None).await;

    assert_eq!(result.status, TrimStatus::Error);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("main_db"));
    assert_eq!(result.rows_deleted, 1);
    assert!(secondary.rows(PERSON).is_empty());
    primary.set_failing(false);
    assert_eq!(primary.rows(PERSON).len(), 1);
    // Trim failures are returned, not counted
    assert_eq!(engine.stats().total_errors, 0);
}
