//! JSON merge patch (RFC 7386) generation against a clean snapshot
//!
//! Applying a patch is left to `json_patch::merge`.

use serde_json::{Map, Value};

/// Compute the merge patch turning `old` into `new`.
///
/// Removed object keys become `null`; arrays and scalars are replaced whole.
pub fn diff(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut patch = Map::new();
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, new_value) in new_map {
                match old_map.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    Some(old_value @ Value::Object(_)) if new_value.is_object() => {
                        patch.insert(key.clone(), diff(old_value, new_value));
                    }
                    _ => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

/// True when a patch carries no changes
pub fn is_empty(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}
