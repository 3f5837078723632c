//! Remote patch issuing: identity, scope, body/status split and the PATCH calls.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::{json, Map, Value as Json};
use tracing::debug;

use kopatch_core::Resource;
use kopatch_kubehub::{ApiContext, ResourceDiscovery, MERGE_PATCH_CONTENT_TYPE};

use crate::{PatchError, PatchResult};

/// Which object to patch: explicit coordinates, or a body to read them from.
#[derive(Debug, Clone, Copy)]
pub enum Identity<'a> {
    Named { namespace: Option<&'a str>, name: &'a str },
    Body(&'a Json),
}

impl<'a> Identity<'a> {
    /// Build from loosely-typed inputs; exactly one of `body` or `name` (+ optional namespace).
    pub fn from_parts(namespace: Option<&'a str>, name: Option<&'a str>, body: Option<&'a Json>) -> PatchResult<Self> {
        match (body, namespace, name) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(PatchError::InvalidArgument(
                "either body, or name+namespace can be specified; got both".into(),
            )),
            (Some(body), None, None) => Ok(Identity::Body(body)),
            (None, namespace, Some(name)) => Ok(Identity::Named { namespace, name }),
            (None, _, None) => Err(PatchError::InvalidArgument(
                "either body, or name+namespace must be specified; got neither".into(),
            )),
        }
    }

    pub fn namespace_and_name(&self) -> PatchResult<(Option<&'a str>, &'a str)> {
        match *self {
            Identity::Named { namespace, name } => Ok((namespace, name)),
            Identity::Body(body) => {
                let meta = body.get("metadata");
                let name = meta
                    .and_then(|m| m.get("name"))
                    .and_then(Json::as_str)
                    .ok_or_else(|| PatchError::InvalidArgument("body has no metadata.name".into()))?;
                let namespace = meta.and_then(|m| m.get("namespace")).and_then(Json::as_str);
                Ok((namespace, name))
            }
        }
    }

    /// The identifying body: the given one, or a minimal `{metadata: {name[, namespace]}}`.
    pub fn to_body(&self) -> PatchResult<Json> {
        if let Identity::Body(body) = self {
            return Ok((*body).clone());
        }
        let (namespace, name) = self.namespace_and_name()?;
        let mut metadata = Map::new();
        metadata.insert("name".into(), Json::from(name));
        if let Some(ns) = namespace {
            metadata.insert("namespace".into(), Json::from(ns));
        }
        Ok(json!({ "metadata": metadata }))
    }
}

/// Null and `{}` carry nothing to send.
pub(crate) fn is_blank(v: &Json) -> bool {
    match v {
        Json::Null => true,
        Json::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// Split off the top-level `status` when it has its own endpoint.
fn split_status(patch: &Map<String, Json>, as_subresource: bool) -> (Map<String, Json>, Option<Json>) {
    let mut body_patch = patch.clone();
    let status_patch = if as_subresource { body_patch.remove("status") } else { None };
    (body_patch, status_patch)
}

/// What the server answered for one patch; `None` where a call was not made,
/// hit a 404, or carried no `status`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Issued {
    /// Main PATCH response, `status` overlaid when the status call answered one.
    pub body: Option<Json>,
    /// `status` of the status-call response.
    pub status: Option<Json>,
}

impl Issued {
    /// The object as these responses show it; `pre` stands in for what they don't.
    pub fn observed(self, pre: &Json) -> Json {
        match (self.body, self.status) {
            (Some(body), _) => body,
            (None, Some(status)) => {
                let mut observed = pre.clone();
                if let Json::Object(fields) = &mut observed {
                    fields.insert("status".into(), status);
                }
                observed
            }
            (None, None) => pre.clone(),
        }
    }
}

/// Issues merge-patches through an injected session, consulting discovery for
/// scope and for where `status` lives.
#[derive(Clone)]
pub struct PatchIssuer {
    discovery: Arc<dyn ResourceDiscovery>,
    context: ApiContext,
}

impl PatchIssuer {
    pub fn new(discovery: Arc<dyn ResourceDiscovery>, context: ApiContext) -> Self {
        Self { discovery, context }
    }

    /// Patch one object.
    ///
    /// Returns the body the server answered the main PATCH with (its `status`
    /// replaced by the status call's answer when both were made), or `None`
    /// when no main PATCH was sent or the object no longer exists.
    pub async fn patch_obj(&self, resource: &Resource, patch: &Json, identity: Identity<'_>) -> PatchResult<Option<Json>> {
        Ok(self.issue(resource, patch, identity).await?.body)
    }

    /// Like [`patch_obj`](Self::patch_obj), but also keeps the `status` the
    /// status call answered with.
    pub async fn issue(&self, resource: &Resource, patch: &Json, identity: Identity<'_>) -> PatchResult<Issued> {
        let Json::Object(patch) = patch else {
            return Err(PatchError::InvalidArgument(format!("patch must be a JSON object, got {}", patch)));
        };
        let (namespace, name) = identity.namespace_and_name()?;

        let namespaced = self.discovery.is_namespaced(resource).await?;
        let namespace = if namespaced { namespace } else { None };

        let as_subresource = self.discovery.is_status_subresource(resource).await?;
        let (body_patch, status_patch) = split_status(patch, as_subresource);

        let mut issued = Issued::default();
        if !body_patch.is_empty() {
            let url = resource.url(&self.context.server, namespace, name, None);
            match self.send(&url, &Json::Object(body_patch)).await? {
                Some(body) => issued.body = Some(body),
                None => return Ok(issued),
            }
        }

        if let Some(status) = status_patch.filter(|s| !is_blank(s)) {
            let url = resource.url(&self.context.server, namespace, name, Some("status"));
            let response = self.send(&url, &json!({ "status": status })).await?;
            issued.status = response.and_then(|mut r| r.get_mut("status").map(Json::take));
            if let (Some(Json::Object(body)), Some(status)) = (issued.body.as_mut(), issued.status.as_ref()) {
                body.insert("status".into(), status.clone());
            }
        }

        Ok(issued)
    }

    /// One PATCH call; `Ok(None)` when the target is gone.
    async fn send(&self, url: &str, payload: &Json) -> PatchResult<Option<Json>> {
        let t0 = Instant::now();
        counter!("patch_requests_total", 1u64);
        debug!(url = %url, "sending merge-patch");
        let res = self.context.session.patch(url, MERGE_PATCH_CONTENT_TYPE, payload).await;
        histogram!("patch_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match res {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.is_not_found() => {
                counter!("patch_not_found_total", 1u64);
                debug!(url = %url, "patch target not found; nothing to patch");
                Ok(None)
            }
            Err(e) => {
                counter!("patch_errors_total", 1u64);
                debug!(url = %url, error = %e, "merge-patch failed");
                Err(e.into())
            }
        }
    }
}
