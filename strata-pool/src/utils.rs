//! Utils

use serde_json::{Map, Value};

/// Patch provided JSON document (given as `serde_json::Value`) in place with JSON Merge Patch
/// (RFC 7396).
///
/// Top level keys whose value actually changed are pushed into `changed` so
/// that observers can be dispatched on the keys they track.
pub fn json_merge_tracked(doc: &mut Value, patch: &Value, changed: &mut Vec<String>) {
    if !patch.is_object() {
        *doc = patch.clone();
        return;
    }

    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let map = doc.as_object_mut().unwrap();
    for (key, value) in patch.as_object().unwrap() {
        if value.is_null() {
            if map.remove(key.as_str()).is_some() {
                changed.push(key.clone());
            }
        } else {
            let slot = map.entry(key.as_str()).or_insert(Value::Null);
            let before = slot.clone();
            json_merge(slot, value);
            if *slot != before {
                changed.push(key.clone());
            }
        }
    }
}

/// Merge patch without change tracking
pub fn json_merge(doc: &mut Value, patch: &Value) {
    let mut ignored = Vec::new();
    json_merge_tracked(doc, patch, &mut ignored);
}
