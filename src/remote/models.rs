// ABOUTME: Wire models for the document-collection and keyed-tree REST APIs
// ABOUTME: Decodes typed document values into plain JSON and orders keyed-tree keys

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Number, Value};
use std::cmp::Ordering;

/// A document as returned by the document store REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreDocument {
    /// Full resource name, `projects/<p>/databases/<d>/documents/<path>/<id>`
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl FirestoreDocument {
    /// Last segment of the resource name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    /// Plain JSON object of the document fields.
    pub fn to_json(&self) -> Result<Value> {
        decode_fields(&self.fields)
            .with_context(|| format!("Failed to decode document {}", self.name))
    }
}

/// One element of a `runQuery` response stream.
#[derive(Debug, Clone, Deserialize)]
pub struct RunQueryResponse {
    #[serde(default)]
    pub document: Option<FirestoreDocument>,
}

/// Body of an ordered, cursor-paged collection query.
pub fn run_query_body(collection: &str, cursor_name: Option<&str>, limit: usize) -> Value {
    let mut query = json!({
        "from": [{ "collectionId": collection }],
        "orderBy": [{ "field": { "fieldPath": "__name__" }, "direction": "ASCENDING" }],
        "limit": limit,
    });
    if let Some(name) = cursor_name {
        query["startAt"] = json!({
            "values": [{ "referenceValue": name }],
            "before": false,
        });
    }
    json!({ "structuredQuery": query })
}

fn decode_fields(fields: &Map<String, Value>) -> Result<Value> {
    let mut decoded = Map::new();
    for (key, value) in fields {
        decoded.insert(
            key.clone(),
            decode_value(value).with_context(|| format!("field '{}'", key))?,
        );
    }
    Ok(Value::Object(decoded))
}

/// Decode one typed value (`{"stringValue": "x"}`, `{"mapValue": {...}}`, ...).
pub fn decode_value(value: &Value) -> Result<Value> {
    let typed = value
        .as_object()
        .ok_or_else(|| anyhow!("expected a typed value object, got {}", value))?;
    let (kind, inner) = typed
        .iter()
        .next()
        .ok_or_else(|| anyhow!("empty typed value"))?;

    let decoded = match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" | "stringValue" | "timestampValue" | "bytesValue" | "referenceValue" => {
            inner.clone()
        }
        "integerValue" => {
            // 64-bit integers are transported as strings
            let n = match inner {
                Value::String(s) => s
                    .parse::<i64>()
                    .with_context(|| format!("invalid integerValue '{}'", s))?,
                Value::Number(n) => n
                    .as_i64()
                    .ok_or_else(|| anyhow!("invalid integerValue {}", n))?,
                other => bail!("invalid integerValue {}", other),
            };
            Value::Number(Number::from(n))
        }
        "doubleValue" => match inner {
            Value::Number(_) => inner.clone(),
            // NaN and infinities arrive as strings and have no JSON form
            Value::String(_) => Value::Null,
            other => bail!("invalid doubleValue {}", other),
        },
        "geoPointValue" => json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": inner.get("longitude").cloned().unwrap_or(json!(0.0)),
        }),
        "arrayValue" => {
            let values = match inner.get("values") {
                Some(Value::Array(values)) => values
                    .iter()
                    .map(decode_value)
                    .collect::<Result<Vec<_>>>()?,
                _ => Vec::new(),
            };
            Value::Array(values)
        }
        "mapValue" => match inner.get("fields") {
            Some(Value::Object(fields)) => decode_fields(fields)?,
            _ => Value::Object(Map::new()),
        },
        other => bail!("unsupported value type '{}'", other),
    };
    Ok(decoded)
}

fn as_int_key(key: &str) -> Option<i32> {
    // Keys with leading zeros or a plus sign sort as strings
    if key.starts_with('+') || (key.len() > 1 && key.starts_with('0')) || key.starts_with("-0") {
        return None;
    }
    key.parse::<i32>().ok()
}

/// Key order of the keyed-tree database: 32-bit integer keys ascending, then
/// all other keys lexicographically.
pub fn compare_rtdb_keys(a: &str, b: &str) -> Ordering {
    match (as_int_key(a), as_int_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
