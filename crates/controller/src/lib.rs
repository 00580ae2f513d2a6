#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! The per-session state machine: [`Controller::spawn`] starts a task that
//! repeatedly drives one session's two [`endpoint::Endpoint`]s through
//! scan, reconcile, stage, and transition, reporting live status through a
//! [`ControllerHandle`] and persisting the advanced ancestor through an
//! [`AncestorSink`].
//!
//! # Design
//!
//! The cycle mirrors the session lifecycle a manager and CLI observe:
//! `Disconnected → Connecting → Scanning → Reconciling → StagingAlpha →
//! TransitioningAlpha → StagingBeta → TransitioningBeta → Saving →
//! Watching`, with the two steady states `Paused` and `Halted` reachable at
//! any point. A transient failure (a connection hiccup, a local I/O error)
//! drops back to `Disconnected` and retries after an exponential
//! [`backoff::Backoff`] delay; a fatal failure (a protocol violation, an
//! oversize tree) shuts both endpoints down and halts the session for good.
//! [`cycle::merge_ancestor`] is the heart of the algorithm: rather than
//! overlaying the cycle's [`reconcile::Change`] records onto the old
//! ancestor, it recomputes agreement directly from the two sides' final
//! trees, so paths that converged without ever producing a `Change` (both
//! sides made the identical edit) still advance.
//!
//! # Invariants
//!
//! - The ancestor only ever advances at a path where this cycle's final
//!   alpha and beta trees agree; a conflict, a problematic entry, or a
//!   failed transition freezes the ancestor at that path exactly as it was.
//! - A `Terminate` command always runs to completion: both endpoints are
//!   asked to shut down before the controller reports `Halted`, even if a
//!   cycle is mid-flight.
//! - [`ControllerHandle::flush`] never resolves before the cycle in
//!   progress (or the next one, if the controller is currently paused or
//!   waiting out a backoff delay) reaches `Saving`.

mod backoff;
mod controller;
mod cycle;
mod sink;
mod state;

pub use backoff::{Backoff, MAX_DELAY, MIN_DELAY};
pub use controller::{Controller, ControllerHandle};
pub use cycle::{apply_changes, classify, count_problematic, merge_ancestor, stage_changes, ErrorClass};
pub use sink::{AncestorSink, NullAncestorSink};
pub use state::{ControllerState, SessionState, TransitionProblem};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use endpoint::{Endpoint, ScanReport, SupplyFrame, TransitionReport};
    use model::Entry;
    use reconcile::Change;
    use rsync::{Frame, Signature};
    use session::Configuration;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use stage::{StageRequest, StageResponse};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct StubEndpoint {
        tree: Mutex<Entry>,
    }

    impl StubEndpoint {
        fn new(tree: Entry) -> Self {
            Self {
                tree: Mutex::new(tree),
            }
        }
    }

    #[async_trait]
    impl Endpoint for StubEndpoint {
        async fn poll(&self, cancellation: &CancellationToken) -> endpoint::Result<()> {
            cancellation.cancelled().await;
            Err(endpoint::EndpointError::Cancelled)
        }

        async fn scan(&self, _baseline: Option<Entry>, _cancellation: &CancellationToken) -> endpoint::Result<ScanReport> {
            Ok(ScanReport {
                snapshot: self.tree.lock().expect("lock poisoned").clone(),
                preserves_executability: true,
                decomposes_unicode: false,
            })
        }

        async fn stage(
            &self,
            _requests: Vec<StageRequest>,
            _cancellation: &CancellationToken,
        ) -> endpoint::Result<StageResponse> {
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
        ) -> endpoint::Result<()> {
            Ok(())
        }

        async fn receive(
            &self,
            _path: String,
            _digest: Vec<u8>,
            _signature: Signature,
            _frames: Vec<Frame>,
            _cancellation: &CancellationToken,
        ) -> endpoint::Result<()> {
            Ok(())
        }

        async fn transition(&self, changes: Vec<Change>, _cancellation: &CancellationToken) -> endpoint::Result<TransitionReport> {
            let mut tree = self.tree.lock().expect("lock poisoned").clone();
            let mut applied = Vec::new();
            for change in changes {
                tree = cycle::apply_changes(tree, std::slice::from_ref(&change), &[change.path.clone()]);
                applied.push(change.path);
            }
            *self.tree.lock().expect("lock poisoned") = tree;
            Ok(TransitionReport {
                applied,
                problems: Vec::new(),
            })
        }

        async fn shutdown(&self) -> endpoint::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_one_sided_addition_propagates_and_halts_cleanly_on_terminate() {
        let alpha: Arc<dyn Endpoint> = Arc::new(StubEndpoint::new(Entry::empty_directory()));
        let beta: Arc<dyn Endpoint> = Arc::new(StubEndpoint::default());

        let config = Configuration::empty().resolve();
        let (handle, join) = Controller::spawn(
            "test-session".to_owned(),
            alpha,
            beta,
            Entry::empty_directory(),
            config,
            false,
            Arc::new(NullAncestorSink),
        );

        let mut watch = handle.watch_state();
        loop {
            watch.changed().await.expect("controller task is alive");
            if watch.borrow().controller_state == ControllerState::Watching {
                break;
            }
        }

        handle.terminate().await;
        join.await.expect("controller task does not panic");
        assert_eq!(handle.state().controller_state, ControllerState::Halted);
    }

    #[tokio::test]
    async fn pause_holds_the_controller_at_the_paused_state() {
        let alpha: Arc<dyn Endpoint> = Arc::new(StubEndpoint::default());
        let beta: Arc<dyn Endpoint> = Arc::new(StubEndpoint::default());
        let config = Configuration::empty().resolve();
        let (handle, join) = Controller::spawn(
            "paused-session".to_owned(),
            alpha,
            beta,
            Entry::empty_directory(),
            config,
            true,
            Arc::new(NullAncestorSink),
        );

        let mut watch = handle.watch_state();
        loop {
            watch.changed().await.expect("controller task is alive");
            if watch.borrow().controller_state == ControllerState::Paused {
                break;
            }
        }
        assert_eq!(handle.state().controller_state, ControllerState::Paused);

        handle.terminate().await;
        join.await.expect("controller task does not panic");
    }
}
