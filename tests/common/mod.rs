// ABOUTME: Shared harness for engine integration tests
// ABOUTME: Two mirror targets, one audit target, in-memory source, recording hooks

#![allow(dead_code)]

use mirror_sync::config::{CollectionOrRecordPathMeta, EngineConfig, SourceKind};
use mirror_sync::error::SyncError;
use mirror_sync::store::memory::{InMemoryAuditStore, InMemoryMirrorStore, InMemorySourceStore};
use mirror_sync::sync::{post_mirror_hook, PostMirrorEvent, SyncAction, SyncEngine, SyncTask};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PERSON: &str = "person";
pub const DEVICE: &str = "device";

pub struct Harness {
    pub engine: SyncEngine,
    pub source: Arc<InMemorySourceStore>,
    pub main_db: Arc<InMemoryMirrorStore>,
    pub backup_db: Arc<InMemoryMirrorStore>,
    pub audit_db: Arc<InMemoryAuditStore>,
    pub post_mirror_events: Arc<Mutex<Vec<PostMirrorEvent>>>,
    pub errors: Arc<Mutex<Vec<String>>>,
}

/// Same shape the engine applies before storing: adds an `obfus` field.
pub fn transform(mut item: Value, path: &str) -> Value {
    if let Value::Object(map) = &mut item {
        map.insert("obfus".to_string(), json!(format!("{} - obfus", path)));
    }
    item
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default().retry_backoff)
}

pub fn harness_with(retry_backoff: Duration) -> Harness {
    let source = Arc::new(InMemorySourceStore::new());
    let main_db = Arc::new(InMemoryMirrorStore::new("main_db"));
    let backup_db = Arc::new(InMemoryMirrorStore::new("backup_db"));
    let audit_db = Arc::new(InMemoryAuditStore::new("backup_db"));
    let post_mirror_events = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let recorded = post_mirror_events.clone();
    let collected = errors.clone();
    let engine = SyncEngine::builder(source.clone())
        .mirror(main_db.clone())
        .mirror(backup_db.clone())
        .audit(audit_db.clone())
        .config(EngineConfig {
            sync_concurrency: 10,
            validator_concurrency: 10,
            retry_backoff,
            paths: vec![
                CollectionOrRecordPathMeta::new(PERSON, SourceKind::DocumentCollection),
                CollectionOrRecordPathMeta::new(DEVICE, SourceKind::KeyedTree),
            ],
        })
        .pre_mirror_transform(transform)
        .post_mirror_hook(post_mirror_hook(move |event| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(event);
            }
        }))
        .error_handler(move |error: &SyncError| {
            collected.lock().unwrap().push(error.kind().to_string());
        })
        .build()
        .expect("engine config is valid");

    Harness {
        engine,
        source,
        main_db,
        backup_db,
        audit_db,
        post_mirror_events,
        errors,
    }
}

impl Harness {
    pub fn post_mirror_count(&self) -> usize {
        self.post_mirror_events.lock().unwrap().len()
    }

    pub fn error_kinds(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn mirrors(&self) -> [&Arc<InMemoryMirrorStore>; 2] {
        [&self.main_db, &self.backup_db]
    }
}

pub fn task(
    action: SyncAction,
    path: &str,
    id: &str,
    before: Option<Value>,
    after: Option<Value>,
    date_ms: i64,
) -> SyncTask {
    SyncTask {
        id_or_key: id.to_string(),
        action,
        collection_or_record_path: path.to_string(),
        before_item: before,
        after_item: after,
        date_ms,
    }
}

pub fn person(id: &str, v: i64) -> Value {
    json!({ "id": id, "name": format!("person {}", id), "v": v })
}
