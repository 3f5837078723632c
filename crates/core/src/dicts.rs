//! Path-level views over nested JSON documents.

use serde_json::{Map, Value as Json};

/// A dotted-path leaf: the keys leading to it and the value found there.
pub type PathLeaf<'a> = (Vec<&'a str>, &'a Json);

type Level<'a> = std::vec::IntoIter<(&'a str, &'a Json)>;

/// Lazy depth-first walk over the leaves of a JSON object.
///
/// A clone continues from the same position; call [`flatten`] again for a fresh pass.
#[derive(Debug, Clone)]
pub struct Flatten<'a> {
    stack: Vec<(Vec<&'a str>, Level<'a>)>,
}

fn level(map: &Map<String, Json>) -> Level<'_> {
    map.iter().map(|(k, v)| (k.as_str(), v)).collect::<Vec<_>>().into_iter()
}

impl<'a> Iterator for Flatten<'a> {
    type Item = PathLeaf<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (prefix, entries) = self.stack.last_mut()?;
            let Some((key, value)) = entries.next() else {
                self.stack.pop();
                continue;
            };
            let mut path = prefix.clone();
            path.push(key);
            match value {
                Json::Object(nested) => self.stack.push((path, level(nested))),
                leaf => return Some((path, leaf)),
            }
        }
    }
}

/// Flatten an object into `(path, leaf)` pairs.
///
/// Nested objects are descended into; everything else (null, scalars, arrays)
/// is a leaf. Anything that is not an object at the top yields nothing.
pub fn flatten(value: &Json) -> Flatten<'_> {
    let stack = match value {
        Json::Object(map) => vec![(Vec::new(), level(map))],
        _ => Vec::new(),
    };
    Flatten { stack }
}

/// Look up a path; `None` when a key is missing or a non-object is crossed.
pub fn resolve<'a, S: AsRef<str>>(value: &'a Json, path: &[S]) -> Option<&'a Json> {
    path.iter().try_fold(value, |cur, key| cur.as_object()?.get(key.as_ref()))
}
