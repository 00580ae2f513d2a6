//! Scan-acceleration cache: remembers the `(size, mtime, mode)` triple that
//! produced a given digest so an unchanged file need not be re-read.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single cached observation of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// File size in bytes at the time of digesting.
    pub size: u64,
    /// Modification time, as seconds and nanoseconds since the Unix epoch.
    pub modification_time: (i64, u32),
    /// POSIX mode bits at the time of digesting.
    pub mode: u32,
}

/// Maps a relative path to the observation that produced its last-known
/// digest, plus the digest itself and its executable flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    entries: HashMap<String, (CacheEntry, Vec<u8>, bool)>,
}

impl Cache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the cached `(digest, executable)` for `path` if its
    /// observation exactly matches `observed`.
    #[must_use]
    pub fn lookup(&self, path: &str, observed: CacheEntry) -> Option<(&[u8], bool)> {
        self.entries.get(path).and_then(|(cached, digest, executable)| {
            if *cached == observed {
                Some((digest.as_slice(), *executable))
            } else {
                None
            }
        })
    }

    /// Records (or overwrites) the observation for `path`.
    pub fn insert(&mut self, path: String, observed: CacheEntry, digest: Vec<u8>, executable: bool) {
        self.entries.insert(path, (observed, digest, executable));
    }

    /// Removes every entry for which `keep` returns `false`, used to drop
    /// paths that no longer exist after a full scan.
    pub fn retain<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.entries.retain(|path, _| keep(path));
    }

    /// Builds a [`ReverseCache`] keyed by `(size, digest)` for locating a
    /// local base file to seed an rsync signature from.
    #[must_use]
    pub fn reverse(&self) -> ReverseCache {
        let mut by_content = HashMap::new();
        for (path, (observed, digest, _)) in &self.entries {
            by_content
                .entry((observed.size, digest.clone()))
                .or_insert_with(|| path.clone());
        }
        ReverseCache { by_content }
    }
}

/// Reverse lookup from `(size, digest)` to a path known to hold that
/// content, used to seed rsync signatures from a local base file rather
/// than transferring whole-file content.
#[derive(Debug, Clone, Default)]
pub struct ReverseCache {
    by_content: HashMap<(u64, Vec<u8>), String>,
}

impl ReverseCache {
    /// Finds a path previously observed to hold `size` bytes with the given
    /// `digest`, if any.
    #[must_use]
    pub fn find(&self, size: u64, digest: &[u8]) -> Option<&str> {
        self.by_content
            .get(&(size, digest.to_vec()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(size: u64, mtime_secs: i64, mode: u32) -> CacheEntry {
        CacheEntry {
            size,
            modification_time: (mtime_secs, 0),
            mode,
        }
    }

    #[test]
    fn lookup_hits_on_exact_match_and_misses_on_drift() {
        let mut cache = Cache::new();
        let observed = observation(100, 1_000, 0o644);
        cache.insert("foo".to_owned(), observed, vec![1, 2, 3], false);

        assert_eq!(cache.lookup("foo", observed), Some((&[1u8, 2, 3][..], false)));

        let drifted = observation(101, 1_000, 0o644);
        assert_eq!(cache.lookup("foo", drifted), None);
    }

    #[test]
    fn retain_drops_stale_paths() {
        let mut cache = Cache::new();
        cache.insert("a".to_owned(), observation(1, 0, 0o644), vec![0], false);
        cache.insert("b".to_owned(), observation(1, 0, 0o644), vec![0], false);
        cache.retain(|path| path == "a");
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("a", observation(1, 0, 0o644)).is_some());
    }

    #[test]
    fn reverse_cache_finds_path_by_content() {
        let mut cache = Cache::new();
        cache.insert("orig".to_owned(), observation(10, 0, 0o644), vec![9, 9], false);
        let reverse = cache.reverse();
        assert_eq!(reverse.find(10, &[9, 9]), Some("orig"));
        assert_eq!(reverse.find(10, &[1, 1]), None);
    }

    #[test]
    fn cache_round_trips_through_bincode() {
        let mut cache = Cache::new();
        cache.insert("foo".to_owned(), observation(5, 42, 0o755), vec![7], true);
        let encoded = bincode::serialize(&cache).unwrap();
        let decoded: Cache = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(
            decoded.lookup("foo", observation(5, 42, 0o755)),
            Some((&[7u8][..], true))
        );
    }
}
