//! In-memory stand-ins for the API server and discovery.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use kopatch_apply::PatchIssuer;
use kopatch_core::{merge, Resource};
use kopatch_kubehub::{ApiContext, ApiSession, ResourceCaps, StaticDiscovery, TransportError};
use serde_json::Value as Json;

pub const SERVER: &str = "https://k8s.test:6443";

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub url: String,
    pub content_type: String,
    pub payload: Json,
}

enum Behaviour {
    /// Merge every payload into the stored object and return it.
    Store(Mutex<Json>),
    /// Return the same body whatever was sent.
    Answer(Json),
    Fail(TransportError),
}

pub struct FakeServer {
    behaviour: Behaviour,
    /// Checked first: URLs ending with the suffix get that behaviour instead.
    overrides: Vec<(String, Behaviour)>,
    calls: Mutex<Vec<Call>>,
}

fn status_error(code: u16) -> TransportError {
    TransportError::Status { code, payload: format!("status {}", code) }
}

impl FakeServer {
    fn with(behaviour: Behaviour) -> Self {
        Self { behaviour, overrides: Vec::new(), calls: Mutex::default() }
    }

    pub fn storing(object: Json) -> Arc<Self> {
        Arc::new(Self::with(Behaviour::Store(Mutex::new(object))))
    }

    pub fn answering(body: Json) -> Arc<Self> {
        Arc::new(Self::with(Behaviour::Answer(body)))
    }

    pub fn failing(code: u16) -> Arc<Self> {
        Arc::new(Self::with(Behaviour::Fail(status_error(code))))
    }

    /// Stores like [`storing`](Self::storing), except for URLs ending in `suffix`.
    pub fn storing_except(object: Json, suffix: &str, code: u16) -> Arc<Self> {
        let mut server = Self::with(Behaviour::Store(Mutex::new(object)));
        server.overrides.push((suffix.to_string(), Behaviour::Fail(status_error(code))));
        Arc::new(server)
    }

    /// Stores, but answers URLs ending in `suffix` with a fixed body.
    pub fn storing_answering(object: Json, suffix: &str, body: Json) -> Arc<Self> {
        let mut server = Self::with(Behaviour::Store(Mutex::new(object)));
        server.overrides.push((suffix.to_string(), Behaviour::Answer(body)));
        Arc::new(server)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.url).collect()
    }
}

#[async_trait::async_trait]
impl ApiSession for FakeServer {
    async fn patch(&self, url: &str, content_type: &str, payload: &Json) -> Result<Json, TransportError> {
        self.calls.lock().unwrap().push(Call {
            url: url.to_string(),
            content_type: content_type.to_string(),
            payload: payload.clone(),
        });
        let behaviour = self
            .overrides
            .iter()
            .find(|(suffix, _)| url.ends_with(suffix.as_str()))
            .map_or(&self.behaviour, |(_, b)| b);
        match behaviour {
            Behaviour::Store(object) => {
                let mut object = object.lock().unwrap();
                *object = merge(&object, payload);
                Ok(object.clone())
            }
            Behaviour::Answer(body) => Ok(body.clone()),
            Behaviour::Fail(err) => Err(err.clone()),
        }
    }
}

pub fn kopfexamples() -> Resource {
    Resource::new("kopf.dev", "v1", "KopfExample", "kopfexamples")
}

pub fn namespaces() -> Resource {
    Resource::new("", "v1", "Namespace", "namespaces")
}

pub fn configmaps() -> Resource {
    Resource::new("", "v1", "ConfigMap", "configmaps")
}

/// kopfexamples: namespaced with a status subresource; configmaps: namespaced
/// without one; namespaces: cluster-scoped with one.
pub fn discovery() -> StaticDiscovery {
    StaticDiscovery::new()
        .with(&kopfexamples(), ResourceCaps { namespaced: true, status_subresource: true })
        .with(&configmaps(), ResourceCaps { namespaced: true, status_subresource: false })
        .with(&namespaces(), ResourceCaps { namespaced: false, status_subresource: true })
}

pub fn issuer(server: &Arc<FakeServer>) -> PatchIssuer {
    let session: Arc<dyn ApiSession> = server.clone();
    PatchIssuer::new(Arc::new(discovery()), ApiContext::new(session, SERVER))
}
