//! # Overview
//!
//! Wire-level plumbing shared by every remote endpoint connection: the
//! version handshake ([`version`]), the tagged request/response envelope
//! ([`envelope`]), and the length-delimited framing that carries envelopes
//! over an `AsyncRead + AsyncWrite` stream ([`multiplex`]).
//!
//! # Design
//!
//! This crate knows nothing about processes, pipes, or compression — that
//! belongs to the transport layer that sits underneath it. It only defines
//! what bytes mean once a connection exists. A connection's lifecycle is
//! always: exchange [`version::VersionTriple`]s via [`version::send_then_receive`]
//! or [`version::receive_then_send`], then exchange any number of
//! [`Request`]/[`Response`] pairs framed by a [`multiplex::MessageCodec`].
//!
//! # Invariants
//!
//! - A version mismatch in either component is fatal to the connection;
//!   there is no negotiation of a common subset.
//! - A frame whose declared length exceeds [`multiplex::MAX_FRAME_LEN`] is a
//!   protocol violation, not a recoverable error; the connection is closed.

mod envelope;
mod multiplex;
mod version;

pub use envelope::{decode, encode, Request, Response, TransitionProblem};
pub use multiplex::{MessageCodec, MAX_FRAME_LEN};
pub use version::{receive_then_send, send_then_receive, VersionTriple, CURRENT, ENCODED_LEN};

use thiserror::Error;

/// Failures that can occur while negotiating or exchanging protocol
/// messages over a connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying connection failed.
    #[error("protocol I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A message could not be encoded or decoded.
    #[error("failed to encode or decode a protocol message: {0}")]
    Codec(#[from] bincode::Error),
    /// A peer declared a frame larger than the protocol permits.
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    OversizedFrame {
        /// The declared length.
        len: u32,
        /// The configured maximum.
        max: u32,
    },
    /// The peer's version triple did not match ours exactly.
    #[error("version handshake mismatch: local {local:?}, remote {remote:?}")]
    VersionMismatch {
        /// This build's version.
        local: VersionTriple,
        /// The version the peer advertised.
        remote: VersionTriple,
    },
}
