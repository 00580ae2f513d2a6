//! The [`controller::AncestorSink`] implementation that persists a
//! controller's advanced ancestor (and, where the session's endpoints are
//! local, their scan caches) through a [`SessionStore`].

use crate::store::{SessionStore, Side};
use async_trait::async_trait;
use endpoint::LocalEndpoint;
use model::Entry;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A session's locally-held endpoint, if any, kept alongside the trait
/// object handed to the controller so the manager can snapshot its cache
/// after every cycle. Remote endpoints have nothing to snapshot here — the
/// agent process owns its own cache persistence, out of scope for this
/// workspace.
#[derive(Clone, Default)]
pub struct LocalCacheHandles {
    pub(crate) alpha: Option<Arc<LocalEndpoint>>,
    pub(crate) beta: Option<Arc<LocalEndpoint>>,
}

impl LocalCacheHandles {
    /// No locally-cacheable endpoints on either side.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Records `endpoint` as alpha's locally-cacheable endpoint.
    #[must_use]
    pub fn with_alpha(mut self, endpoint: Arc<LocalEndpoint>) -> Self {
        self.alpha = Some(endpoint);
        self
    }

    /// Records `endpoint` as beta's locally-cacheable endpoint.
    #[must_use]
    pub fn with_beta(mut self, endpoint: Arc<LocalEndpoint>) -> Self {
        self.beta = Some(endpoint);
        self
    }
}

/// Persists ancestors (and local caches) for every session the manager
/// currently tracks. One instance is shared across all of a manager's
/// controllers; each controller only ever calls [`AncestorSink::save_ancestor`]
/// with its own session identifier.
pub struct ManagerAncestorSink {
    store: Arc<SessionStore>,
    handles: Mutex<std::collections::HashMap<String, LocalCacheHandles>>,
}

impl ManagerAncestorSink {
    /// Creates a sink writing through `store`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            handles: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Registers `handles` as the locally-cacheable endpoints for
    /// `session_id`, so its next ancestor save also snapshots their caches.
    pub async fn register(&self, session_id: String, handles: LocalCacheHandles) {
        self.handles.lock().await.insert(session_id, handles);
    }

    /// Forgets a terminated session's registered handles.
    pub async fn unregister(&self, session_id: &str) {
        self.handles.lock().await.remove(session_id);
    }
}

#[async_trait]
impl controller::AncestorSink for ManagerAncestorSink {
    async fn save_ancestor(&self, session_id: &str, ancestor: &Entry) -> std::io::Result<()> {
        self.store
            .save_ancestor(session_id, ancestor)
            .map_err(to_io_error)?;

        let handles = self.handles.lock().await.get(session_id).cloned();
        if let Some(handles) = handles {
            if let Some(alpha) = &handles.alpha {
                let cache = alpha.cache_snapshot().await;
                self.store.save_cache(session_id, Side::Alpha, &cache).map_err(to_io_error)?;
            }
            if let Some(beta) = &handles.beta {
                let cache = beta.cache_snapshot().await;
                self.store.save_cache(session_id, Side::Beta, &cache).map_err(to_io_error)?;
            }
        }
        Ok(())
    }
}

fn to_io_error(error: crate::store::StoreError) -> std::io::Error {
    match error {
        crate::store::StoreError::Io(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
    }
}
