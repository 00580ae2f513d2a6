#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! Rolling and strong checksum primitives used by the rsync engine to build
//! block signatures and by the scanner to digest file content.
//!
//! # Design
//!
//! - [`rolling`] implements the weak, incrementally-updatable checksum used
//!   to find candidate block boundaries during delta transfers.
//! - [`strong`] exposes the [`strong::StrongDigest`] trait together with
//!   SHA-1, SHA-256, and XXH3-128 implementations; a session picks one
//!   algorithm for the lifetime of a digest and uses it consistently for
//!   both the scanner's content digests and the rsync engine's block
//!   signatures.
//!
//! # Invariants
//!
//! - Rolling checksum updates never panic; mismatched slice lengths are
//!   reported through [`rolling::RollingError`].
//! - Strong digests stream data incrementally and produce a fixed-width
//!   digest, independent of input length.

pub mod rolling;
pub mod strong;

pub use rolling::{RollingChecksum, RollingError};
pub use strong::{HashAlgorithm, StrongDigest};
