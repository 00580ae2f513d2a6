#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! The typed filesystem tree ([`Entry`]) and scan-acceleration [`Cache`]
//! shared by the scanner, reconciler, and stager.
//!
//! # Design
//!
//! [`Entry`] is a strict tree (no cycles are representable) with five
//! variants matching the synchronizable content types: directories, regular
//! files (identified by content digest), symbolic links, untracked content
//! the scanner declined to read, and problematic content that could not be
//! read. [`Cache`] accelerates re-scanning by remembering the
//! `(size, mtime, mode)` triple that produced a given digest.
//!
//! # Invariants
//!
//! - A [`Entry::Directory`]'s children are stored in an ordered map keyed by
//!   name; encoding therefore always visits children in the same order.
//! - [`Entry::validate`] rejects trees whose total entry count exceeds a
//!   caller-supplied maximum, and rejects any name that is empty or
//!   contains `/`, `.`, or `..`.
//! - `decode(encode(tree)) == tree` for any valid tree (see the round-trip
//!   test in this crate).

mod cache;
mod entry;
mod modes;

pub use cache::{Cache, CacheEntry, ReverseCache};
pub use entry::{validate_portable_symlink_target, Entry, EntryKind, ModelError, Result};
pub use modes::{
    IgnoreVCSMode, ProbeMode, ScanMode, StageMode, SymbolicLinkMode, SynchronizationMode,
    WatchMode,
};
