//! Transparent re-authentication around an [`ApiSession`].
//!
//! A 401 from the current session triggers one login (single-flight across
//! all concurrent callers) and one retry on the fresh session.

use std::sync::Arc;

use arc_swap::ArcSwap;
use kube::Config;
use metrics::counter;
use serde_json::Value as Json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{ApiSession, KubeSession, TransportError};

/// Source of fresh sessions.
#[async_trait::async_trait]
pub trait Login: Send + Sync {
    type Session: ApiSession + 'static;

    async fn login(&self) -> Result<Self::Session, TransportError>;
}

/// Re-reads kubeconfig / in-cluster credentials.
pub struct KubeLogin;

#[async_trait::async_trait]
impl Login for KubeLogin {
    type Session = KubeSession;

    async fn login(&self) -> Result<KubeSession, TransportError> {
        let config = Config::infer().await.map_err(|e| TransportError::Request(format!("inferring kube config: {}", e)))?;
        Ok(KubeSession::try_from_config(config)?)
    }
}

struct Generation<S> {
    number: u64,
    session: S,
}

pub struct ReauthSession<L: Login> {
    current: ArcSwap<Generation<L::Session>>,
    login: L,
    refreshing: Mutex<()>,
}

impl<L: Login> ReauthSession<L> {
    pub fn new(initial: L::Session, login: L) -> Self {
        Self {
            current: ArcSwap::from_pointee(Generation { number: 0, session: initial }),
            login,
            refreshing: Mutex::new(()),
        }
    }

    /// How many times credentials were replaced.
    pub fn generation(&self) -> u64 { self.current.load().number }

    async fn relogin(&self, stale: u64) -> Result<Arc<Generation<L::Session>>, TransportError> {
        let _guard = self.refreshing.lock().await;
        let current = self.current.load_full();
        if current.number != stale {
            debug!(generation = current.number, "session already refreshed by another caller");
            return Ok(current);
        }
        let session = self.login.login().await?;
        let next = Arc::new(Generation { number: stale + 1, session });
        self.current.store(Arc::clone(&next));
        counter!("session_reauth_total", 1u64);
        info!(generation = next.number, "re-authenticated API session");
        Ok(next)
    }
}

#[async_trait::async_trait]
impl<L: Login> ApiSession for ReauthSession<L> {
    async fn patch(&self, url: &str, content_type: &str, payload: &Json) -> Result<Json, TransportError> {
        let observed = self.current.load_full();
        match observed.session.patch(url, content_type, payload).await {
            Err(e) if e.is_unauthorized() => {
                debug!(url = %url, "credentials rejected; re-authenticating");
                let fresh = self.relogin(observed.number).await?;
                fresh.session.patch(url, content_type, payload).await
            }
            other => other,
        }
    }
}
