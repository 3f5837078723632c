//! JSON merge-patch (RFC 7386) simulation.
//!
//! Used only to predict what the API server should hold after a patch; the
//! wire payload is always the patch document itself.

use serde_json::{Map, Value as Json};

/// Apply `patch` to a copy of `target` and return the result.
///
/// Nulls in the patch delete keys, objects merge recursively, and everything
/// else (scalars, arrays) replaces the target value wholesale.
pub fn merge(target: &Json, patch: &Json) -> Json {
    let mut result = target.clone();
    merge_into(&mut result, patch);
    result
}

fn merge_into(target: &mut Json, patch: &Json) {
    let Json::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Json::Object(Map::new());
    }
    if let Json::Object(fields) = target {
        for (key, value) in patch {
            if value.is_null() {
                fields.remove(key);
            } else {
                merge_into(fields.entry(key.clone()).or_insert(Json::Null), value);
            }
        }
    }
}
