// ABOUTME: Mutation and validator task models submitted to the engine
// ABOUTME: Tasks are immutable once created; only their effects persist

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::hooks::MirrorHookAction;

/// The kind of mutation observed in the source store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(SyncAction::Create),
            "update" => Some(SyncAction::Update),
            "delete" => Some(SyncAction::Delete),
            _ => None,
        }
    }

    /// Action name passed to the post-mirror hook.
    pub fn hook_action(&self) -> MirrorHookAction {
        match self {
            SyncAction::Create | SyncAction::Update => MirrorHookAction::CreateOrUpdate,
            SyncAction::Delete => MirrorHookAction::Delete,
        }
    }
}

/// One observed mutation.
///
/// `date_ms` is the logical time the change was observed. It orders tasks
/// for the same item and resolves write conflicts; arrival order is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    pub id_or_key: String,
    pub action: SyncAction,
    pub collection_or_record_path: String,
    #[serde(default)]
    pub before_item: Option<Value>,
    #[serde(default)]
    pub after_item: Option<Value>,
    #[serde(rename = "dateMS")]
    pub date_ms: i64,
}

impl SyncTask {
    /// The validator asserting this mutation has reached the mirrors.
    pub fn validator(&self) -> SyncTaskValidator {
        SyncTaskValidator {
            id_or_key: self.id_or_key.clone(),
            action: self.action,
            collection_or_record_path: self.collection_or_record_path.clone(),
            after_item: self.after_item.clone(),
            date_ms: self.date_ms,
        }
    }

    pub(crate) fn gate_key(&self) -> String {
        gate_key(&self.collection_or_record_path, &self.id_or_key)
    }
}

/// Asserts that a mutation should by now be reflected in every mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTaskValidator {
    pub id_or_key: String,
    pub action: SyncAction,
    pub collection_or_record_path: String,
    #[serde(default)]
    pub after_item: Option<Value>,
    #[serde(rename = "dateMS")]
    pub date_ms: i64,
}

impl SyncTaskValidator {
    pub(crate) fn gate_key(&self) -> String {
        gate_key(&self.collection_or_record_path, &self.id_or_key)
    }
}

fn gate_key(path: &str, id: &str) -> String {
    // Registered paths are identifiers, so '/' cannot appear in them.
    format!("{}/{}", path, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_wire_format() {
        let task: SyncTask = serde_json::from_value(json!({
            "idOrKey": "p1",
            "action": "create",
            "collectionOrRecordPath": "person",
            "afterItem": {"id": "p1", "v": 1},
            "dateMS": 100
        }))
        .unwrap();
        assert_eq!(task.action, SyncAction::Create);
        assert_eq!(task.before_item, None);
        assert_eq!(task.date_ms, 100);
    }

    #[test]
    fn test_validator_derivation() {
        let task = SyncTask {
            id_or_key: "p1".to_string(),
            action: SyncAction::Update,
            collection_or_record_path: "person".to_string(),
            before_item: Some(json!({"v": 1})),
            after_item: Some(json!({"v": 2})),
            date_ms: 110,
        };
        let validator = task.validator();
        assert_eq!(validator.after_item, Some(json!({"v": 2})));
        assert_eq!(validator.date_ms, 110);
        assert_eq!(validator.gate_key(), task.gate_key());
    }

    #[test]
    fn test_gate_keys_are_scoped_by_path() {
        let mut task = SyncTask {
            id_or_key: "x".to_string(),
            action: SyncAction::Delete,
            collection_or_record_path: "person".to_string(),
            before_item: None,
            after_item: None,
            date_ms: 1,
        };
        let person_key = task.gate_key();
        task.collection_or_record_path = "device".to_string();
        assert_ne!(person_key, task.gate_key());
    }

    #[test]
    fn test_hook_action_mapping() {
        assert_eq!(
            SyncAction::Create.hook_action(),
            MirrorHookAction::CreateOrUpdate
        );
        assert_eq!(SyncAction::Delete.hook_action(), MirrorHookAction::Delete);
        assert_eq!(SyncAction::parse("update"), Some(SyncAction::Update));
        assert_eq!(SyncAction::parse("upsert"), None);
    }
}
