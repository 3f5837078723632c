//! Resource scope and subresource layout, as reported by API discovery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use kube::{
    discovery::{ApiCapabilities, Discovery, Scope},
    Client,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use kopatch_core::Resource;

use crate::{parse_gvk_key, TransportError};

/// What patching needs to know about a resource kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCaps {
    pub namespaced: bool,
    /// `status` is served as an independent subresource (`.../{name}/status`).
    pub status_subresource: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("resource not served by the API: {0}")]
    Unknown(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Discovery collaborator. Implementations must be safe to share between
/// concurrent reconciliation tasks.
#[async_trait::async_trait]
pub trait ResourceDiscovery: Send + Sync {
    async fn capabilities(&self, resource: &Resource) -> Result<ResourceCaps, DiscoveryError>;

    async fn is_namespaced(&self, resource: &Resource) -> Result<bool, DiscoveryError> {
        Ok(self.capabilities(resource).await?.namespaced)
    }

    async fn is_status_subresource(&self, resource: &Resource) -> Result<bool, DiscoveryError> {
        Ok(self.capabilities(resource).await?.status_subresource)
    }
}

type ResourceKey = (String, String, String);

fn key_of(resource: &Resource) -> ResourceKey {
    (resource.group.clone(), resource.version.clone(), resource.plural.clone())
}

/// Fixed capability table, for offline use and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    entries: FxHashMap<ResourceKey, ResourceCaps>,
}

impl StaticDiscovery {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, resource: &Resource, caps: ResourceCaps) -> Self {
        self.entries.insert(key_of(resource), caps);
        self
    }
}

#[async_trait::async_trait]
impl ResourceDiscovery for StaticDiscovery {
    async fn capabilities(&self, resource: &Resource) -> Result<ResourceCaps, DiscoveryError> {
        self.entries.get(&key_of(resource)).copied().ok_or_else(|| DiscoveryError::Unknown(resource.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
struct DiscoveryIndex {
    by_key: FxHashMap<ResourceKey, (Resource, ResourceCaps)>,
}

impl DiscoveryIndex {
    fn insert(&mut self, resource: Resource, caps: ResourceCaps) {
        self.by_key.insert(key_of(&resource), (resource, caps));
    }

    fn get(&self, resource: &Resource) -> Option<ResourceCaps> {
        self.by_key.get(&key_of(resource)).map(|(_, caps)| *caps)
    }
}

fn caps_from(caps: &ApiCapabilities) -> ResourceCaps {
    ResourceCaps {
        namespaced: matches!(caps.scope, Scope::Namespaced),
        status_subresource: caps
            .subresources
            .iter()
            .any(|(sub, _)| sub.plural == "status" || sub.plural.ends_with("/status")),
    }
}

/// Where a full index comes from.
#[async_trait::async_trait]
trait IndexSource: Send + Sync {
    async fn load(&self) -> Result<DiscoveryIndex, TransportError>;
}

#[async_trait::async_trait]
impl IndexSource for Client {
    async fn load(&self) -> Result<DiscoveryIndex, TransportError> {
        let discovery = Discovery::new(self.clone()).run().await?;
        let mut index = DiscoveryIndex::default();
        for group in discovery.groups() {
            for version in group.versions() {
                for (ar, caps) in group.versioned_resources(version) {
                    index.insert(Resource::new(&ar.group, &ar.version, &ar.kind, &ar.plural), caps_from(&caps));
                }
            }
        }
        Ok(index)
    }
}

struct Snapshot {
    index: DiscoveryIndex,
    loaded_at: Instant,
}

/// Shortest gap between two refreshes; misses inside it are answered from the current index.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Discovery backed by the API server, indexed once and refreshed on a miss.
///
/// Readers never block: a refresh builds a new index and swaps it in whole.
/// Concurrent misses share one refresh, and an index younger than the
/// refresh interval is trusted to be complete.
pub struct KubeDiscovery {
    source: Box<dyn IndexSource>,
    snapshot: ArcSwap<Snapshot>,
    refreshing: Mutex<()>,
    min_refresh: Duration,
}

impl KubeDiscovery {
    pub async fn run(client: Client) -> Result<Self> {
        let discovery = Self::load_from(Box::new(client)).await.context("running API discovery")?;
        info!(resources = discovery.snapshot.load().index.by_key.len(), "discovery index built");
        Ok(discovery)
    }

    async fn load_from(source: Box<dyn IndexSource>) -> Result<Self, TransportError> {
        let index = source.load().await?;
        Ok(Self {
            source,
            snapshot: ArcSwap::from_pointee(Snapshot { index, loaded_at: Instant::now() }),
            refreshing: Mutex::new(()),
            min_refresh: MIN_REFRESH_INTERVAL,
        })
    }

    #[cfg(test)]
    fn with_min_refresh(mut self, interval: Duration) -> Self {
        self.min_refresh = interval;
        self
    }

    /// Rebuild the index, unless another caller replaced `seen` meanwhile.
    async fn refresh_after(&self, seen: &Arc<Snapshot>) -> Result<(), TransportError> {
        let _guard = self.refreshing.lock().await;
        if !Arc::ptr_eq(&self.snapshot.load_full(), seen) {
            debug!("discovery index already refreshed by another caller");
            return Ok(());
        }
        let index = self.source.load().await?;
        debug!(resources = index.by_key.len(), "discovery index refreshed");
        self.snapshot.store(Arc::new(Snapshot { index, loaded_at: Instant::now() }));
        Ok(())
    }

    /// Find a resource by `v1/Kind` or `group/v1/Kind`.
    pub fn resolve_gvk(&self, gvk_key: &str) -> Result<Option<(Resource, ResourceCaps)>> {
        let (group, version, kind) = parse_gvk_key(gvk_key)?;
        let snapshot = self.snapshot.load();
        Ok(snapshot
            .index
            .by_key
            .values()
            .find(|(r, _)| r.group == group && r.version == version && r.kind == kind)
            .cloned())
    }
}

#[async_trait::async_trait]
impl ResourceDiscovery for KubeDiscovery {
    async fn capabilities(&self, resource: &Resource) -> Result<ResourceCaps, DiscoveryError> {
        let seen = self.snapshot.load_full();
        if let Some(caps) = seen.index.get(resource) {
            return Ok(caps);
        }
        // CRDs installed after startup show up only after a refresh.
        if seen.loaded_at.elapsed() >= self.min_refresh {
            if let Err(e) = self.refresh_after(&seen).await {
                warn!(error = %e, resource = %resource, "discovery refresh failed");
                return Err(e.into());
            }
        }
        self.snapshot.load().index.get(resource).ok_or_else(|| DiscoveryError::Unknown(resource.to_string()))
    }
}
