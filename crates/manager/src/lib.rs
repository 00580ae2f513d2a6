#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! The session registry: [`Manager`] owns the set of live
//! [`controller::Controller`]s, mediates create/list/pause/resume/reset/
//! flush/terminate, and durably persists every session's descriptor,
//! ancestor, and (for locally-backed endpoints) scan cache through a
//! [`SessionStore`].
//!
//! # Design
//!
//! The manager does not dial endpoints itself — constructing a
//! [`endpoint::LocalEndpoint`] or establishing a transport connection to a
//! remote agent is an external collaborator's job (see the crate-level
//! docs for why: transport establishment and agent bootstrap are listed as
//! out of scope). [`Manager::create`] and [`Manager::resume`] instead
//! accept already-built [`EndpointHandle`]s and take care of everything
//! downstream of that: identifier assignment, descriptor persistence,
//! controller construction, and ancestor/cache persistence via
//! [`ManagerAncestorSink`].
//!
//! # Invariants
//!
//! - A session's identifier, once assigned, never changes and is never
//!   reused by a later session.
//! - [`Manager::terminate`] always deletes a session's durable state only
//!   after its controller has finished shutting down, so a crash mid-
//!   termination leaves the session resumable rather than half-deleted.

mod ids;
mod manager;
mod sink;
mod store;

pub use manager::{EndpointHandle, Manager, ManagerError, Result};
pub use sink::{LocalCacheHandles, ManagerAncestorSink};
pub use store::{SessionStore, Side, StoreError};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ::endpoint::{Endpoint, ScanReport, SupplyFrame, TransitionReport};
    use model::Entry;
    use reconcile::Change;
    use rsync::{Frame, Signature};
    use session::{Configuration, EndpointUrl};
    use std::collections::HashMap;
    use std::sync::Arc;
    use stage::{StageRequest, StageResponse};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct StubEndpoint;

    #[async_trait]
    impl Endpoint for StubEndpoint {
        async fn poll(&self, cancellation: &CancellationToken) -> ::endpoint::Result<()> {
            cancellation.cancelled().await;
            Err(::endpoint::EndpointError::Cancelled)
        }

        async fn scan(&self, _baseline: Option<Entry>, _cancellation: &CancellationToken) -> ::endpoint::Result<ScanReport> {
            Ok(ScanReport {
                snapshot: Entry::empty_directory(),
                preserves_executability: true,
                decomposes_unicode: false,
            })
        }

        async fn stage(&self, _requests: Vec<StageRequest>, _cancellation: &CancellationToken) -> ::endpoint::Result<StageResponse> {
            Ok(StageResponse {
                paths_needed: Vec::new(),
                signatures: HashMap::new(),
            })
        }

        async fn supply(
            &self,
            _paths: Vec<String>,
            _signatures: HashMap<String, Signature>,
            _sink: mpsc::UnboundedSender<SupplyFrame>,
            _cancellation: &CancellationToken,
        ) -> ::endpoint::Result<()> {
            Ok(())
        }

        async fn receive(
            &self,
            _path: String,
            _digest: Vec<u8>,
            _signature: Signature,
            _frames: Vec<Frame>,
            _cancellation: &CancellationToken,
        ) -> ::endpoint::Result<()> {
            Ok(())
        }

        async fn transition(&self, _changes: Vec<Change>, _cancellation: &CancellationToken) -> ::endpoint::Result<TransitionReport> {
            Ok(TransitionReport::default())
        }

        async fn shutdown(&self) -> ::endpoint::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_persists_a_descriptor_and_starts_a_controller() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (manager, resurrected) = Manager::open(temp.path(), Configuration::empty()).expect("open manager");
        assert!(resurrected.is_empty());

        let descriptor = manager
            .create(
                EndpointUrl("/alpha".to_owned()),
                EndpointUrl("/beta".to_owned()),
                EndpointHandle::remote(Arc::new(StubEndpoint)),
                EndpointHandle::remote(Arc::new(StubEndpoint)),
                Some("test".to_owned()),
                HashMap::new(),
                Configuration::empty(),
                Configuration::empty(),
                Configuration::empty(),
            )
            .await
            .expect("create session");

        let selected = manager.select(&descriptor.identifier).await;
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name.as_deref(), Some("test"));

        manager.terminate(&descriptor.identifier).await.expect("terminate");
        assert!(manager.select(&descriptor.identifier).await.is_empty());
    }

    #[tokio::test]
    async fn pause_persists_across_a_manager_restart() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (manager, _) = Manager::open(temp.path(), Configuration::empty()).expect("open manager");
        let descriptor = manager
            .create(
                EndpointUrl("/alpha".to_owned()),
                EndpointUrl("/beta".to_owned()),
                EndpointHandle::remote(Arc::new(StubEndpoint)),
                EndpointHandle::remote(Arc::new(StubEndpoint)),
                None,
                HashMap::new(),
                Configuration::empty(),
                Configuration::empty(),
                Configuration::empty(),
            )
            .await
            .expect("create session");
        manager.pause(&descriptor.identifier).await.expect("pause");

        let (_reopened, resurrected) = Manager::open(temp.path(), Configuration::empty()).expect("reopen manager");
        let reloaded = resurrected
            .into_iter()
            .find(|d| d.identifier == descriptor.identifier)
            .expect("descriptor persisted");
        assert!(reloaded.paused);
    }
}
