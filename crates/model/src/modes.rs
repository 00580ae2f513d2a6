//! Configuration mode enums shared across the scanner, reconciler, stager,
//! and session configuration.

use serde::{Deserialize, Serialize};

/// How the reconciler resolves divergent changes between the two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynchronizationMode {
    /// Conflicts are surfaced; neither side is modified for them.
    TwoWaySafe,
    /// Conflicts are resolved in favor of whichever side wins per the
    /// session's `alphaWinsOnConflict`/`betaWinsOnConflict` hints.
    TwoWayResolved,
    /// Beta mirrors alpha; deletions or divergent changes on beta are
    /// reported as conflicts rather than applied.
    OneWaySafe,
    /// Beta is overwritten to match alpha unconditionally; beta-side
    /// changes are silently discarded.
    OneWayReplica,
}

impl Default for SynchronizationMode {
    fn default() -> Self {
        Self::TwoWaySafe
    }
}

/// Whether the scanner probes filesystem capabilities or assumes
/// conservative defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeMode {
    /// Probe the filesystem for executable-bit preservation and Unicode
    /// decomposition behavior.
    Probe,
    /// Skip probing and assume conservative defaults.
    Assume,
}

impl Default for ProbeMode {
    fn default() -> Self {
        Self::Probe
    }
}

/// Whether the scanner performs a full walk or trusts the watcher's
/// recheck-path hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    /// Always perform a complete recursive walk.
    Full,
    /// Reuse the previous snapshot for subtrees the watcher did not flag.
    Accelerated,
}

impl Default for ScanMode {
    fn default() -> Self {
        Self::Accelerated
    }
}

/// Where a session's staging directory lives relative to the synchronized
/// root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageMode {
    /// Stage under the engine's own state directory.
    Mutagen,
    /// Stage in a directory neighboring the synchronization root.
    Neighboring,
}

impl Default for StageMode {
    fn default() -> Self {
        Self::Mutagen
    }
}

/// How symbolic links are scanned and represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolicLinkMode {
    /// Symbolic links are skipped entirely.
    Ignore,
    /// Only relative links whose normalized target stays within the root
    /// are synchronized, stored as their textual target.
    Portable,
    /// Any link target is stored verbatim; unsupported targets become
    /// [`crate::Entry::Problematic`].
    PosixRaw,
}

impl Default for SymbolicLinkMode {
    fn default() -> Self {
        Self::Portable
    }
}

/// How filesystem change notifications are obtained between scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchMode {
    /// Use the platform's native watching facility where available.
    Portable,
    /// Always fall back to polling, ignoring any native watcher.
    ForcePoll,
    /// Never watch; rely solely on manually triggered scans.
    NoWatch,
}

impl Default for WatchMode {
    fn default() -> Self {
        Self::Portable
    }
}

/// Whether conventional VCS directories are ignored or synchronized like
/// any other content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnoreVCSMode {
    /// Ignore `.git`, `.svn`, `.hg`, `.bzr`, `_darcs` directories.
    Ignore,
    /// Synchronize VCS directories like any other content.
    Propagate,
}

impl Default for IgnoreVCSMode {
    fn default() -> Self {
        Self::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_conservative_choices() {
        assert_eq!(SynchronizationMode::default(), SynchronizationMode::TwoWaySafe);
        assert_eq!(ProbeMode::default(), ProbeMode::Probe);
        assert_eq!(ScanMode::default(), ScanMode::Accelerated);
        assert_eq!(StageMode::default(), StageMode::Mutagen);
        assert_eq!(SymbolicLinkMode::default(), SymbolicLinkMode::Portable);
        assert_eq!(WatchMode::default(), WatchMode::Portable);
        assert_eq!(IgnoreVCSMode::default(), IgnoreVCSMode::Ignore);
    }
}
