#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! The agent connection: a DEFLATE-compressed duplex byte stream carrying
//! the protocol crate's framed messages between the controller and a
//! remote endpoint's agent process. The connection "pretends" to be a
//! network connection (it implements `AsyncRead`/`AsyncWrite`) but has no
//! real close/deadline/address semantics of its own — see
//! [`CompressedStream::close`] and friends — because its lifetime is tied
//! to the transport process (SSH, container exec, ...) a caller dials
//! separately.
//!
//! # Design
//!
//! [`CompressedStream`] wraps any `AsyncRead + AsyncWrite` duplex (for the
//! standard-I/O case, [`Joined`] combines two otherwise-unrelated halves,
//! e.g. a child process's stdout/stdin) with a raw-DEFLATE [`Compress`]
//! encoder and [`Decompress`] decoder. The encoder is flushed with
//! `Sync::Flush` on every [`tokio::io::AsyncWriteExt::flush`] call, so a
//! caller that writes one protocol message then flushes produces a
//! self-delimited compressed chunk the peer's decompressor can fully
//! drain without waiting for more input — preserving message boundaries
//! across the compressed stream.
//!
//! # Invariants
//!
//! - [`CompressedStream`] never silently drops buffered compressed output:
//!   `poll_flush` and `poll_shutdown` both drain it completely before
//!   reporting success.
//! - Compression uses raw DEFLATE (no zlib header/trailer), matching the
//!   wire format described in the synchronization protocol.

mod compressed;
mod joined;

pub use compressed::{CompressedStream, COMPRESSION_LEVEL};
pub use joined::Joined;

use thiserror::Error;

/// Errors produced by the compressed agent connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying connection failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// This connection does not support the requested operation; it is not
    /// a real network socket. Callers must rely on process exit (closing
    /// the transport's stdin/stdout, or terminating the dialed subprocess)
    /// to end the connection.
    #[error("{0} is not supported on an agent connection; terminate the underlying transport process instead")]
    Unsupported(&'static str),
}
