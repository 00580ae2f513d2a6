//! The session registry: tracks every live controller, mediates lifecycle
//! operations, and resurrects sessions whose descriptors survive a restart.

use crate::ids;
use crate::sink::{LocalCacheHandles, ManagerAncestorSink};
use crate::store::{SessionStore, StoreError};
use controller::{Controller, ControllerHandle, SessionState};
use endpoint::Endpoint;
use session::{Configuration, EndpointUrl, SessionDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors a [`Manager`] lifecycle operation can fail with.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No session matches the given identifier or name.
    #[error("no such session: {0}")]
    NotFound(String),
    /// Durable session state could not be read or written.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for [`Manager`] operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Everything needed to construct one endpoint side of a new or resumed
/// session: the trait object the controller drives, and (for a local
/// endpoint) the concrete handle the manager uses to snapshot its cache.
pub struct EndpointHandle {
    /// The endpoint as the controller drives it.
    pub endpoint: Arc<dyn Endpoint>,
    /// Present when `endpoint` is backed by a [`endpoint::LocalEndpoint`],
    /// so its cache can be persisted after each cycle.
    pub local: Option<Arc<endpoint::LocalEndpoint>>,
}

impl EndpointHandle {
    /// Wraps a remote (or otherwise non-cacheable) endpoint.
    #[must_use]
    pub fn remote(endpoint: Arc<dyn Endpoint>) -> Self {
        Self { endpoint, local: None }
    }

    /// Wraps a local endpoint, registering it for cache persistence.
    #[must_use]
    pub fn local(endpoint: Arc<endpoint::LocalEndpoint>) -> Self {
        Self {
            endpoint: endpoint.clone(),
            local: Some(endpoint),
        }
    }
}

struct ManagedSession {
    descriptor: SessionDescriptor,
    handle: ControllerHandle,
    join: tokio::task::JoinHandle<()>,
}

/// Registry of every session this process is managing: creates new
/// sessions, lists and selects existing ones, and drives pause/resume/
/// reset/flush/terminate against their controllers.
pub struct Manager {
    store: Arc<SessionStore>,
    ancestor_sink: Arc<ManagerAncestorSink>,
    global_default: Configuration,
    sessions: Mutex<HashMap<String, ManagedSession>>,
}

impl Manager {
    /// Opens the session store at `state_dir`. Returns the manager plus
    /// every descriptor persisted from a previous run, none of which has a
    /// running controller yet — call [`Manager::resume`] for each one
    /// after reconstructing its endpoints (dialing a remote agent is an
    /// external collaborator, out of scope here).
    pub fn open(state_dir: impl Into<std::path::PathBuf>, global_default: Configuration) -> Result<(Self, Vec<SessionDescriptor>)> {
        let store = Arc::new(SessionStore::open(state_dir)?);
        let descriptors = store.load_all_descriptors()?;
        let manager = Self {
            ancestor_sink: Arc::new(ManagerAncestorSink::new(store.clone())),
            store,
            global_default,
            sessions: Mutex::new(HashMap::new()),
        };
        Ok((manager, descriptors))
    }

    /// Creates a brand-new session, persists its descriptor, and starts its
    /// controller.
    pub async fn create(
        &self,
        alpha_url: EndpointUrl,
        beta_url: EndpointUrl,
        alpha: EndpointHandle,
        beta: EndpointHandle,
        name: Option<String>,
        labels: HashMap<String, String>,
        configuration: Configuration,
        alpha_configuration: Configuration,
        beta_configuration: Configuration,
    ) -> Result<SessionDescriptor> {
        let descriptor = SessionDescriptor {
            identifier: ids::generate(),
            name,
            labels,
            alpha: alpha_url,
            beta: beta_url,
            configuration,
            alpha_configuration,
            beta_configuration,
            created_at: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
            creation_version: env!("CARGO_PKG_VERSION").to_owned(),
            paused: false,
        };
        self.store.save_descriptor(&descriptor)?;
        self.start_controller(descriptor.clone(), alpha, beta, model::Entry::empty_directory())
            .await;
        Ok(descriptor)
    }

    /// Resumes a session loaded from disk (one of [`Manager::open`]'s
    /// returned descriptors), starting its controller from its persisted
    /// ancestor and paused state.
    pub async fn resume(&self, descriptor: SessionDescriptor, alpha: EndpointHandle, beta: EndpointHandle) -> Result<()> {
        let ancestor = self.store.load_ancestor(&descriptor.identifier)?;
        self.start_controller(descriptor, alpha, beta, ancestor).await;
        Ok(())
    }

    async fn start_controller(
        &self,
        descriptor: SessionDescriptor,
        alpha: EndpointHandle,
        beta: EndpointHandle,
        ancestor: model::Entry,
    ) {
        let resolved = session::merge_layers(&self.global_default, &descriptor.configuration, None).resolve();
        self.ancestor_sink
            .register(
                descriptor.identifier.clone(),
                LocalCacheHandles::none()
                    .maybe_with_alpha(alpha.local.clone())
                    .maybe_with_beta(beta.local.clone()),
            )
            .await;

        let (handle, join) = Controller::spawn(
            descriptor.identifier.clone(),
            alpha.endpoint,
            beta.endpoint,
            ancestor,
            resolved,
            descriptor.paused,
            self.ancestor_sink.clone(),
        );
        self.sessions.lock().await.insert(
            descriptor.identifier.clone(),
            ManagedSession { descriptor, handle, join },
        );
    }

    /// Every descriptor currently tracked, regardless of selector.
    pub async fn list_all(&self) -> Vec<SessionDescriptor> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|managed| managed.descriptor.clone())
            .collect()
    }

    /// Descriptors matching an identifier, a name, or (with a leading
    /// `label:`) a label selector; `"all"` selects every session.
    pub async fn select(&self, specification: &str) -> Vec<SessionDescriptor> {
        if specification == "all" {
            return self.list_all().await;
        }
        if let Some(selector) = specification.strip_prefix("label:") {
            return self
                .sessions
                .lock()
                .await
                .values()
                .filter(|managed| managed.descriptor.matches_label_selector(selector))
                .map(|managed| managed.descriptor.clone())
                .collect();
        }
        self.sessions
            .lock()
            .await
            .values()
            .filter(|managed| {
                managed.descriptor.identifier == specification
                    || managed.descriptor.name.as_deref() == Some(specification)
            })
            .map(|managed| managed.descriptor.clone())
            .collect()
    }

    /// The live status of one session's controller.
    pub async fn state(&self, session_id: &str) -> Result<SessionState> {
        let sessions = self.sessions.lock().await;
        let managed = sessions.get(session_id).ok_or_else(|| ManagerError::NotFound(session_id.to_owned()))?;
        Ok(managed.handle.state())
    }

    /// Pauses a session and persists its paused flag.
    pub async fn pause(&self, session_id: &str) -> Result<()> {
        self.with_session_mut(session_id, |managed| managed.descriptor.paused = true).await?;
        let handle = self.handle_of(session_id).await?;
        handle.pause();
        Ok(())
    }

    /// Resumes a paused session and persists its paused flag.
    pub async fn resume_paused(&self, session_id: &str) -> Result<()> {
        self.with_session_mut(session_id, |managed| managed.descriptor.paused = false).await?;
        let handle = self.handle_of(session_id).await?;
        handle.resume();
        Ok(())
    }

    /// Discards a session's ancestor, forcing a full reconciliation on its
    /// next cycle.
    pub async fn reset(&self, session_id: &str) -> Result<()> {
        self.handle_of(session_id).await?.reset();
        Ok(())
    }

    /// Forces an immediate cycle and waits for it to reach `Saving`.
    pub async fn flush(&self, session_id: &str) -> Result<()> {
        self.handle_of(session_id).await?.flush().await;
        Ok(())
    }

    /// Terminates a session permanently: shuts its endpoints down, stops
    /// its controller, and deletes all of its durable state.
    pub async fn terminate(&self, session_id: &str) -> Result<()> {
        let managed = self
            .sessions
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| ManagerError::NotFound(session_id.to_owned()))?;
        managed.handle.terminate().await;
        let _ = managed.join.await;
        self.ancestor_sink.unregister(session_id).await;
        self.store.delete_session(session_id)?;
        Ok(())
    }

    async fn handle_of(&self, session_id: &str) -> Result<ControllerHandle> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|managed| managed.handle.clone())
            .ok_or_else(|| ManagerError::NotFound(session_id.to_owned()))
    }

    async fn with_session_mut(&self, session_id: &str, mutate: impl FnOnce(&mut ManagedSession)) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let managed = sessions.get_mut(session_id).ok_or_else(|| ManagerError::NotFound(session_id.to_owned()))?;
        mutate(managed);
        self.store.save_descriptor(&managed.descriptor)?;
        Ok(())
    }
}

impl LocalCacheHandles {
    fn maybe_with_alpha(self, endpoint: Option<Arc<endpoint::LocalEndpoint>>) -> Self {
        match endpoint {
            Some(endpoint) => self.with_alpha(endpoint),
            None => self,
        }
    }

    fn maybe_with_beta(self, endpoint: Option<Arc<endpoint::LocalEndpoint>>) -> Self {
        match endpoint {
            Some(endpoint) => self.with_beta(endpoint),
            None => self,
        }
    }
}
