// ABOUTME: Key-order independent JSON comparison used by the validator, healer and scanner
// ABOUTME: Objects are rebuilt with sorted keys before serializing

use serde_json::{Map, Value};

/// Rebuild a value with every object's keys in ascending order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical string form of a JSON value.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Deep structural equality that ignores object key order.
pub fn items_match(a: &Value, b: &Value) -> bool {
    canonical_json(a) == canonical_json(b)
}
