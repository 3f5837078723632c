//! kopatch core types: resource descriptors, merge-patch simulation and
//! outcome verification. Everything here is pure; network lives in
//! `kopatch-kubehub` and `kopatch-apply`.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod dicts;
pub mod merge;
pub mod verify;

pub use dicts::{flatten, resolve, Flatten};
pub use merge::merge;
pub use verify::{verify, Mismatch};

/// A served resource kind, addressed by group/version and its plural name.
///
/// Scope (namespaced or cluster-wide) and the subresource layout are not part
/// of the descriptor: they come from discovery at patch time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Resource {
    /// API group; empty for the core group (`v1`).
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl Resource {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }

    /// `apiVersion` as it appears in object bodies.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    /// Key in the `v1/Kind` or `group/v1/Kind` form used on the command line.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }

    /// URL of one object (or one of its subresources) of this kind.
    ///
    /// The namespace segment is emitted only when a namespace is given; callers
    /// pass `None` for cluster-scoped kinds.
    pub fn url(&self, server: &str, namespace: Option<&str>, name: &str, subresource: Option<&str>) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(8);
        if self.group.is_empty() {
            parts.extend(["api", self.version.as_str()]);
        } else {
            parts.extend(["apis", self.group.as_str(), self.version.as_str()]);
        }
        if let Some(ns) = namespace {
            parts.extend(["namespaces", ns]);
        }
        parts.extend([self.plural.as_str(), name]);
        if let Some(sub) = subresource {
            parts.push(sub);
        }
        format!("{}/{}", server.trim_end_matches('/'), parts.join("/"))
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.plural)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.plural)
        }
    }
}
