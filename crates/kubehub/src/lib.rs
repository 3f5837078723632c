//! kopatch kubehub: API sessions, discovery and re-authentication on top of kube-rs.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use kube::{core::ApiResource, Client, Config};
use serde_json::Value as Json;
use tracing::debug;

use kopatch_core::Resource;

pub mod auth;
pub mod discovery;

pub use auth::{KubeLogin, Login, ReauthSession};
pub use discovery::{DiscoveryError, KubeDiscovery, ResourceCaps, ResourceDiscovery, StaticDiscovery};

pub const MERGE_PATCH_CONTENT_TYPE: &str = "application/merge-patch+json";

/// Failure of a single API call, as seen by the patching code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("API responded with {code}: {payload}")]
    Status { code: u16, payload: String },
    /// The request never produced a response (connection, TLS, decoding...).
    #[error("API request failed: {0}")]
    Request(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { code, .. } => Some(*code),
            TransportError::Request(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool { self.status() == Some(404) }

    pub fn is_unauthorized(&self) -> bool { self.status() == Some(401) }
}

impl From<kube::Error> for TransportError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) => TransportError::Status { code: resp.code, payload: resp.message },
            other => TransportError::Request(other.to_string()),
        }
    }
}

/// An authenticated connection able to PATCH arbitrary API URLs.
#[async_trait::async_trait]
pub trait ApiSession: Send + Sync {
    /// PATCH `url` with `payload` sent as `content_type`; returns the response JSON.
    async fn patch(&self, url: &str, content_type: &str, payload: &Json) -> Result<Json, TransportError>;
}

/// Session plus the server it talks to. Cheap to clone and share across tasks.
#[derive(Clone)]
pub struct ApiContext {
    pub session: Arc<dyn ApiSession>,
    /// Base URL without a trailing slash, e.g. `https://10.0.0.1:6443`.
    pub server: String,
}

impl ApiContext {
    pub fn new(session: Arc<dyn ApiSession>, server: impl Into<String>) -> Self {
        Self { session, server: server.into().trim_end_matches('/').to_string() }
    }

    /// Context from the ambient kubeconfig / in-cluster config, re-authenticating on 401.
    pub async fn infer() -> Result<Self> {
        let config = Config::infer().await.context("inferring kube config")?;
        let initial = KubeSession::try_from_config(config).context("building kube client")?;
        let server = initial.base.clone();
        debug!(server = %server, "api context ready");
        Ok(Self::new(Arc::new(ReauthSession::new(initial, KubeLogin)), server))
    }
}

/// [`ApiSession`] backed by a kube-rs [`Client`].
#[derive(Clone)]
pub struct KubeSession {
    client: Client,
    base: String,
}

impl KubeSession {
    pub fn try_from_config(config: Config) -> Result<Self, kube::Error> {
        let base = config.cluster_url.to_string().trim_end_matches('/').to_string();
        let client = Client::try_from(config)?;
        Ok(Self { client, base })
    }

    /// The client prepends its own cluster URL, so requests carry only path and query.
    fn request_path(&self, url: &str) -> Result<String, TransportError> {
        if let Some(rest) = url.strip_prefix(self.base.as_str()) {
            return Ok(if rest.starts_with('/') { rest.to_string() } else { format!("/{}", rest) });
        }
        let uri: http::Uri = url.parse().map_err(|e| TransportError::Request(format!("invalid url {}: {}", url, e)))?;
        Ok(uri.path_and_query().map(|p| p.as_str().to_string()).unwrap_or_else(|| "/".to_string()))
    }
}

#[async_trait::async_trait]
impl ApiSession for KubeSession {
    async fn patch(&self, url: &str, content_type: &str, payload: &Json) -> Result<Json, TransportError> {
        let path = self.request_path(url)?;
        let body = serde_json::to_vec(payload).map_err(|e| TransportError::Request(format!("encoding patch: {}", e)))?;
        let req = http::Request::patch(path)
            .header(http::header::CONTENT_TYPE, content_type)
            .body(body)
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(self.client.request::<Json>(req).await?)
    }
}

/// Parse `v1/Kind` or `group/v1/Kind`.
pub fn parse_gvk_key(key: &str) -> Result<(String, String, String)> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok((String::new(), (*version).to_string(), (*kind).to_string())),
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(((*group).to_string(), (*version).to_string(), (*kind).to_string())),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// kube-rs view of a resource descriptor, for typed-less `Api<DynamicObject>` calls.
pub fn api_resource(resource: &Resource) -> ApiResource {
    ApiResource {
        group: resource.group.clone(),
        version: resource.version.clone(),
        api_version: resource.api_version(),
        kind: resource.kind.clone(),
        plural: resource.plural.clone(),
    }
}
