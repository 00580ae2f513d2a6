#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! The rsync block-signature delta engine: `Signature(base)`,
//! `Deltify(target, signature)`, and `Patch(base, signature, operations)`.
//! The engine operates over arbitrary byte streams; it has no knowledge of
//! paths, trees, or the controller's cycle — the stager drives it per file.
//!
//! # Design
//!
//! - [`signature`] builds a [`Signature`] over a base's content, one
//!   [`SignatureBlock`] per fixed-size block.
//! - [`delta`] walks a target's bytes with a sliding window, finding blocks
//!   that already exist in the base signature (weak checksum match
//!   confirmed with a strong digest) and emitting [`Operation::Block`]
//!   references interleaved with [`Operation::Data`] literals for anything
//!   new.
//! - [`patch`] replays a sequence of operations against a base reader to
//!   reconstruct the target.
//! - [`transmission`] defines the per-file `{operation?, done?, error?}`
//!   frame stream and the bounded-memory receiver with burn-on-error
//!   semantics described in the synchronization protocol.
//!
//! # Invariants
//!
//! - `patch(base, signature(base), deltify(target, signature(base))) ==
//!   target`, byte-for-byte, for any base/target pair (see the round-trip
//!   property test in [`delta`]).
//! - [`Operation::Data`] chunks never exceed [`transmission::MAX_DATA_SIZE`]
//!   bytes, bounding receiver memory.

pub mod delta;
pub mod signature;
pub mod transmission;

pub use delta::{deltify, Operation};
pub use signature::{Signature, SignatureBlock};
pub use transmission::{Frame, RsyncError, Result};
