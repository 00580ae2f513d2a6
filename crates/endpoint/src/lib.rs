#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! The uniform endpoint capability set the controller drives: Poll, Scan,
//! Stage, Supply, Transition, Shutdown. [`LocalEndpoint`] implements it
//! directly against a filesystem root; [`RemoteEndpoint`] implements it as
//! a framed RPC over an [`transport::CompressedStream`] agent connection.
//! Both are driven only through the [`Endpoint`] trait object, mirroring
//! the local/remote duality the synchronization engine is built around.
//!
//! # Design
//!
//! Every operation takes a `&tokio_util::sync::CancellationToken` so the
//! controller can interrupt work at a safe point without inventing a
//! bespoke cancellation channel per call. `Supply` streams its frames
//! through an unbounded `tokio::sync::mpsc` channel rather than returning
//! a single buffered response, so a large file's reconstruction can begin
//! on the receiving side before the whole transmission completes.
//!
//! # Invariants
//!
//! - A cancelled call returns [`EndpointError::Cancelled`] rather than a
//!   partial result silently mistaken for a complete one.
//! - [`RemoteEndpoint`] serves at most one logical request at a time
//!   (matching the agent's single-threaded dispatch loop); concurrent
//!   `Endpoint` calls queue rather than interleave on the wire.

mod local;
mod remote;

pub use local::{LocalEndpoint, LocalEndpointConfig};
pub use remote::RemoteEndpoint;

use async_trait::async_trait;
use model::Entry;
use reconcile::Change;
use rsync::{Frame, Signature};
use stage::{StageRequest, StageResponse};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors an [`Endpoint`] call can fail with. Only failures that prevent
/// the call from completing at all belong here; per-path problems (a
/// scan's [`model::Entry::Problematic`] placeholders, a transition's
/// [`stage::TransitionProblem`]s) are part of the call's successful
/// result.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The local scanner failed outright (as opposed to producing
    /// per-path `Problematic` entries).
    #[error("scan failed: {0}")]
    Scan(#[from] scan::ScanError),
    /// The local stager failed to reconstruct staged content.
    #[error("staging failed: {0}")]
    Stage(#[from] stage::StageError),
    /// An I/O operation against the synchronization root failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The remote connection's framing, encoding, or version handshake
    /// failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
    /// The remote endpoint reported that it could not serve the request
    /// at all.
    #[error("remote endpoint error: {0}")]
    Remote(String),
    /// The remote endpoint replied with a response of the wrong shape for
    /// the request that was sent; this is a protocol violation.
    #[error("unexpected response to a {0} request")]
    UnexpectedResponse(&'static str),
    /// The remote connection closed before a response arrived.
    #[error("remote endpoint connection closed unexpectedly")]
    ConnectionClosed,
    /// The call was cancelled before completing.
    #[error("endpoint call cancelled")]
    Cancelled,
}

/// Result type for endpoint operations.
pub type Result<T> = std::result::Result<T, EndpointError>;

/// Everything a successful [`Endpoint::scan`] call produces.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// The freshly observed tree.
    pub snapshot: Entry,
    /// Whether this endpoint's filesystem preserves the executable bit.
    pub preserves_executability: bool,
    /// Whether this endpoint's filesystem decomposes Unicode file names.
    pub decomposes_unicode: bool,
}

/// One frame of an in-progress [`Endpoint::supply`] stream, tagged with
/// which requested path it belongs to.
#[derive(Debug, Clone)]
pub struct SupplyFrame {
    /// The path this frame transmits content for.
    pub path: String,
    /// The frame itself.
    pub frame: Frame,
}

/// One path whose transition failed, with a human-readable reason. Used
/// uniformly by both [`LocalEndpoint`] (which flattens its
/// [`stage::TransitionError`] to text) and [`RemoteEndpoint`] (whose wire
/// form never carries a typed error across the connection).
#[derive(Debug, Clone)]
pub struct TransitionProblem {
    /// The path whose change failed.
    pub path: String,
    /// Why it failed.
    pub reason: String,
}

/// Everything a successful [`Endpoint::transition`] call produces.
#[derive(Debug, Default)]
pub struct TransitionReport {
    /// Paths whose change applied successfully.
    pub applied: Vec<String>,
    /// Paths whose change failed, and why.
    pub problems: Vec<TransitionProblem>,
}

/// The capability set a controller drives a session's two endpoints
/// through. Implemented directly by [`LocalEndpoint`] and over the wire by
/// [`RemoteEndpoint`].
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Blocks until a watch event fires, the polling interval elapses, or
    /// `cancellation` fires.
    async fn poll(&self, cancellation: &CancellationToken) -> Result<()>;

    /// Produces a fresh snapshot of this endpoint's tree, optionally
    /// accelerated against `baseline`.
    async fn scan(&self, baseline: Option<Entry>, cancellation: &CancellationToken) -> Result<ScanReport>;

    /// Asks which of `requests` still need content transferred, and for a
    /// base signature for each.
    async fn stage(
        &self,
        requests: Vec<StageRequest>,
        cancellation: &CancellationToken,
    ) -> Result<StageResponse>;

    /// Streams rsync transmissions reconstructing `paths` against `signatures`
    /// (the base signatures a prior `stage` call on the target side
    /// returned), delivering frames to `sink` as they are produced.
    async fn supply(
        &self,
        paths: Vec<String>,
        signatures: HashMap<String, Signature>,
        sink: mpsc::UnboundedSender<SupplyFrame>,
        cancellation: &CancellationToken,
    ) -> Result<()>;

    /// Accepts one path's complete supply frame stream (gathered by the
    /// controller from the opposite endpoint's `supply` call) and writes
    /// the reconstructed content into this endpoint's staging area, keyed
    /// by `(path, digest)`. `signature` is the same base signature this
    /// endpoint returned from the `stage` call that triggered the supply;
    /// the base bytes it was computed against are this endpoint's own
    /// current content at `path`, re-read here rather than threaded
    /// through the call.
    async fn receive(
        &self,
        path: String,
        digest: Vec<u8>,
        signature: Signature,
        frames: Vec<Frame>,
        cancellation: &CancellationToken,
    ) -> Result<()>;

    /// Applies a batch of changes atomically per path.
    async fn transition(&self, changes: Vec<Change>, cancellation: &CancellationToken) -> Result<TransitionReport>;

    /// Releases all resources; no further calls will be made.
    async fn shutdown(&self) -> Result<()>;
}
