#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! The recursive filesystem walker that produces an [`model::Entry`] tree
//! for one side of a session, accelerated by a [`model::Cache`] of prior
//! digests and an [`filters::IgnoreCache`] of prior ignore verdicts.
//!
//! # Design
//!
//! [`scan`] walks a root directory depth-first, visiting children in
//! sorted order (guaranteed independently of filesystem iteration order
//! because [`model::Entry::Directory`] stores children in a `BTreeMap`).
//! For each path: ignore rules are consulted first; a matching cache
//! observation short-circuits digesting; accelerated mode additionally
//! lets an unmodified subtree be copied from the previous snapshot without
//! touching the filesystem at all. [`probe`] determines whether the root
//! preserves executable bits and whether its filesystem decomposes Unicode
//! filenames, so the reconciler can compare entries appropriately.
//!
//! # Invariants
//!
//! - Per-entry read failures become [`model::Entry::Problematic`] at that
//!   path; the scan as a whole still succeeds.
//! - A path in `recheck_paths`, or the root itself, never reuses the
//!   previous snapshot without inspecting the filesystem.
//! - Exceeding the configured maximum entry count is a fatal
//!   [`ScanError::TooManyEntries`].

mod probe;
mod walk;

use model::{Cache, Entry, IgnoreVCSMode, ProbeMode, ScanMode, SymbolicLinkMode};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

pub use probe::Capabilities;

/// Errors produced while scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    /// An I/O error unrelated to a specific entry (e.g. the root itself is
    /// unreadable).
    #[error("scan of {path}: {source}")]
    Io {
        /// The path being operated on.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The scanned tree failed validation (entry count, name legality, or
    /// symbolic link target legality).
    #[error(transparent)]
    InvalidTree(#[from] model::ModelError),
    /// The scan was cancelled before completing.
    #[error("scan cancelled")]
    Cancelled,
}

/// Result type for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Inputs to one [`scan`] call.
pub struct ScanRequest<'a> {
    /// Root of the synchronized tree on this endpoint.
    pub root: &'a Path,
    /// The prior scan's snapshot, consulted in [`ScanMode::Accelerated`].
    pub previous_snapshot: Option<&'a Entry>,
    /// Relative paths the watcher has flagged as changed since the
    /// previous scan; `None` forces full treatment of everything.
    pub recheck_paths: Option<&'a HashSet<String>>,
    /// Digest algorithm used for file content.
    pub algorithm: checksums::HashAlgorithm,
    /// The cache of prior `(size, mtime, mode)` observations.
    pub cache: Cache,
    /// Ordered ignore rules.
    pub ignores: &'a filters::IgnoreSet,
    /// The memoized ignore evaluation cache from the prior scan.
    pub ignore_cache: filters::IgnoreCache,
    /// Whether to probe filesystem capabilities or assume conservative
    /// defaults.
    pub probe_mode: ProbeMode,
    /// How symbolic links are represented.
    pub symlink_mode: SymbolicLinkMode,
    /// Whether conventional VCS directories are skipped.
    pub ignore_vcs_mode: IgnoreVCSMode,
    /// Full vs. accelerated walking strategy.
    pub scan_mode: ScanMode,
    /// Cap on total entry count; 0 means unlimited.
    pub maximum_entry_count: u64,
    /// Polled periodically; returning `true` aborts the scan promptly.
    pub is_cancelled: &'a dyn Fn() -> bool,
}

/// Everything a [`scan`] call produces.
pub struct ScanOutcome {
    /// The freshly observed tree.
    pub snapshot: Entry,
    /// Whether the root preserves the executable bit.
    pub preserves_executability: bool,
    /// Whether the root's filesystem normalizes filenames to decomposed
    /// Unicode form.
    pub decomposes_unicode: bool,
    /// The cache, updated with this scan's observations.
    pub cache: Cache,
    /// The ignore cache, rotated to reflect this scan's lookups.
    pub ignore_cache: filters::IgnoreCache,
}

/// Scans `request.root`, producing a full [`Entry`] tree plus updated
/// caches and capability probes.
pub fn scan(request: ScanRequest<'_>) -> Result<ScanOutcome> {
    if (request.is_cancelled)() {
        return Err(ScanError::Cancelled);
    }

    let capabilities = probe::probe(request.root, request.probe_mode);

    let mut walker = walk::Walker::new(&request);
    let snapshot = walker.walk_root()?;

    snapshot.validate(request.maximum_entry_count)?;

    let (cache, ignore_cache) = walker.finish();

    Ok(ScanOutcome {
        snapshot,
        preserves_executability: capabilities.preserves_executability,
        decomposes_unicode: capabilities.decomposes_unicode,
        cache,
        ignore_cache,
    })
}
