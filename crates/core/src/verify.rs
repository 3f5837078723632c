//! Post-patch verification: did the server keep what we asked for?

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

use crate::{merge, resolve};

/// One patched path whose observed value differs from the predicted one.
///
/// `None` means the path is absent on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Dotted key sequence, e.g. `status.akey`.
    pub path: String,
    pub got: Option<Json>,
    pub expected: Option<Json>,
}

impl Mismatch {
    pub fn to_json(&self) -> Json {
        json!({ "path": self.path, "got": self.got, "expected": self.expected })
    }
}

/// Compare the body observed after a patch with what merge-patch semantics predict.
///
/// Only paths the patch touches are compared; fields the server adds on its
/// own are not mismatches. A patch object that the server left as a
/// non-object is reported once, at its own path, with both whole values.
/// With no pre-patch body there is nothing to predict from and the result is
/// empty. Results are ordered by path.
pub fn verify(pre: Option<&Json>, post: &Json, patch: &Json) -> Vec<Mismatch> {
    let Some(pre) = pre else { return Vec::new() };
    let Json::Object(fields) = patch else { return Vec::new() };
    let expected = merge(pre, patch);
    let mut mismatches = Vec::new();
    compare(fields, &mut Vec::new(), &expected, post, &mut mismatches);
    mismatches.sort_by(|a, b| a.path.cmp(&b.path));
    mismatches
}

fn compare<'a>(patch: &'a Map<String, Json>, path: &mut Vec<&'a str>, expected: &Json, post: &Json, out: &mut Vec<Mismatch>) {
    for (key, value) in patch {
        path.push(key);
        let got = resolve(post, path.as_slice());
        let want = resolve(expected, path.as_slice());
        match value {
            // Absent on the server: the leaves below say what is missing.
            Json::Object(nested) if got.map_or(true, Json::is_object) => compare(nested, path, expected, post, out),
            Json::Object(_) => out.push(mismatch(path, got, want)),
            _ if got != want => out.push(mismatch(path, got, want)),
            _ => {}
        }
        path.pop();
    }
}

fn mismatch(path: &[&str], got: Option<&Json>, expected: Option<&Json>) -> Mismatch {
    Mismatch { path: path.join("."), got: got.cloned(), expected: expected.cloned() }
}
