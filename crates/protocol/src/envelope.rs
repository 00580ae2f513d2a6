//! The tagged request/response envelope sent between the controller and a
//! remote endpoint.

use model::Entry;
use reconcile::Change;
use rsync::{Frame, Signature};
use serde::{Deserialize, Serialize};
use stage::{StageRequest, StageResponse};
use std::collections::HashMap;

/// One RPC call a controller may issue against an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Block until a watch event fires, the polling interval elapses, or
    /// the call is cancelled.
    Poll,
    /// Produce a fresh snapshot of the endpoint's tree.
    Scan {
        /// The previous snapshot, if the endpoint may use it to accelerate
        /// the walk.
        baseline: Option<Entry>,
    },
    /// Ask the endpoint which of these paths still need content
    /// transferred, and for a base signature for each.
    Stage {
        /// Paths and the digest each must end up with.
        requests: Vec<StageRequest>,
    },
    /// Ask the endpoint to stream transmissions reconstructing `paths`
    /// against the given base `signatures`. The response is a sequence of
    /// [`Response::SupplyFrame`] messages, one or more per path, each
    /// path's stream terminated by a [`rsync::Frame::Done`].
    Supply {
        /// Paths to transmit.
        paths: Vec<String>,
        /// Base signature for each path in `paths`, as returned by an
        /// earlier `Stage` call against the other endpoint.
        signatures: HashMap<String, Signature>,
    },
    /// Hand the endpoint one path's complete supply frame stream (gathered
    /// by the controller from the opposite endpoint's `Supply` reply) so it
    /// can write the reconstructed content into its own staging area.
    Receive {
        /// The path this content belongs to.
        path: String,
        /// The digest the reconstructed content must have.
        digest: Vec<u8>,
        /// The base signature this endpoint supplied from its own `Stage`
        /// reply for this path.
        signature: Signature,
        /// The path's complete, already-terminated frame stream.
        frames: Vec<Frame>,
    },
    /// Apply a batch of changes atomically per path.
    Transition {
        /// The changes to apply.
        changes: Vec<Change>,
    },
    /// Release all resources; no further requests will be sent.
    Shutdown,
}

/// One path that failed to transition, with a human-readable reason. Wire
/// form of `stage::TransitionProblem`, whose `error` field is not directly
/// serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionProblem {
    /// The path whose change failed.
    pub path: String,
    /// Why it failed.
    pub reason: String,
}

/// An endpoint's reply to one [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Reply to [`Request::Poll`]: something is ready.
    Poll,
    /// Reply to [`Request::Scan`].
    Scan {
        /// The fresh snapshot.
        snapshot: Entry,
        /// Whether this endpoint's filesystem preserves the executable
        /// bit.
        preserves_executability: bool,
        /// Whether this endpoint's filesystem decomposes Unicode file
        /// names (HFS+-style NFD normalization).
        decomposes_unicode: bool,
        /// Set if the scan could not complete; `snapshot` reflects
        /// whatever was gathered before the failure.
        error: Option<String>,
    },
    /// Reply to [`Request::Stage`].
    Stage(StageResponse),
    /// One frame of an in-progress [`Request::Supply`] stream.
    SupplyFrame {
        /// Which requested path this frame belongs to.
        path: String,
        /// The frame itself.
        frame: Frame,
    },
    /// Reply to [`Request::Receive`].
    Receive,
    /// Reply to [`Request::Transition`].
    Transition {
        /// Paths that transitioned successfully.
        applied: Vec<String>,
        /// Paths that did not, and why.
        problems: Vec<TransitionProblem>,
    },
    /// Reply to [`Request::Shutdown`].
    Shutdown,
    /// The request could not be served at all (as opposed to a per-path
    /// problem reported within a successful reply).
    Error(String),
}

/// Serializes a [`Request`] or [`Response`] using the workspace's
/// deterministic wire encoding, for handing to [`crate::multiplex`]'s
/// length-delimited framing.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(message)
}

/// Deserializes a message previously produced by [`encode`].
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_encode_decode() {
        let request = Request::Supply {
            paths: vec!["a.txt".to_owned()],
            signatures: HashMap::new(),
        };
        let bytes = encode(&request).expect("encode");
        let decoded: Request = decode(&bytes).expect("decode");
        assert!(matches!(decoded, Request::Supply { paths, .. } if paths == vec!["a.txt".to_owned()]));
    }

    #[test]
    fn response_round_trips_through_encode_decode() {
        let response = Response::SupplyFrame {
            path: "a.txt".to_owned(),
            frame: Frame::Done,
        };
        let bytes = encode(&response).expect("encode");
        let decoded: Response = decode(&bytes).expect("decode");
        assert!(matches!(
            decoded,
            Response::SupplyFrame { frame: Frame::Done, .. }
        ));
    }

    #[test]
    fn shutdown_is_a_unit_variant_with_a_minimal_encoding() {
        let bytes = encode(&Request::Shutdown).expect("encode");
        // Bincode encodes a unit enum variant as just its 4-byte
        // discriminant tag.
        assert_eq!(bytes.len(), 4);
    }
}
