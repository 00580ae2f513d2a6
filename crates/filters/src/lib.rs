#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! Ordered, gitignore-flavored ignore-pattern evaluation used by the
//! scanner to decide which paths to omit from a synchronized tree.
//!
//! # Design
//!
//! An [`IgnoreSet`] holds an ordered list of rules parsed from pattern
//! strings. Rules are evaluated in order for a given path; the last rule
//! that matches determines the outcome (a later unnegated match ignores the
//! path, a later `!`-prefixed rule re-includes it). An [`IgnoreCache`]
//! memoizes the outcome per path so repeated scans of an unchanged tree
//! don't re-run pattern matching.
//!
//! # Invariants
//!
//! - Rule order is preserved exactly as supplied; evaluation never
//!   reorders or deduplicates rules.
//! - A pattern containing an internal `/` is anchored to the synchronization
//!   root; a pattern with no internal `/` matches the basename at any depth.
//! - A trailing `/` restricts a pattern to directories only.

mod pattern;

use rustc_hash::FxHashMap;
use std::path::Path;
use thiserror::Error;

pub use pattern::Pattern;

/// Directory names conventionally owned by version-control systems.
pub const VCS_DIRECTORIES: &[&str] = &[".git", ".svn", ".hg", ".bzr", "_darcs"];

/// Errors produced while parsing ignore patterns.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    /// The pattern string was empty.
    #[error("empty ignore pattern")]
    EmptyPattern,
    /// The pattern used an unsupported escape or glob construct.
    #[error("invalid ignore pattern {0:?}: {1}")]
    InvalidPattern(String, &'static str),
}

/// Result type for filter operations.
pub type Result<T> = std::result::Result<T, FilterError>;

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    negate: bool,
}

/// An ordered collection of ignore rules.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    rules: Vec<Rule>,
}

impl IgnoreSet {
    /// Parses an ordered list of pattern strings (as found in
    /// `Configuration::ignores`) into an [`IgnoreSet`].
    ///
    /// A pattern beginning with `!` re-includes paths matched by an earlier
    /// rule; all other patterns ignore matching paths.
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut rules = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let raw = raw.as_ref();
            if raw.is_empty() {
                return Err(FilterError::EmptyPattern);
            }
            let (negate, body) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            if body.is_empty() {
                return Err(FilterError::InvalidPattern(
                    raw.to_owned(),
                    "negated pattern has no body",
                ));
            }
            rules.push(Rule {
                pattern: Pattern::parse(body)?,
                negate,
            });
        }
        Ok(Self { rules })
    }

    /// Whether `relative_path` (POSIX-separated, relative to the
    /// synchronization root, no leading `/`) is ignored, consulting every
    /// rule in order and keeping the last match's verdict.
    #[must_use]
    pub fn is_ignored(&self, relative_path: &str, is_dir: bool) -> bool {
        let mut ignored = false;
        for rule in &self.rules {
            if rule.pattern.matches(relative_path, is_dir) {
                ignored = !rule.negate;
            }
        }
        ignored
    }

    /// Whether the ignore set has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Memoizes [`IgnoreSet::is_ignored`] results per path across scans.
///
/// The scanner passes the same cache into successive `Scan` calls; entries
/// for paths no longer present are simply never looked up again and are
/// dropped when the cache is rebuilt for the next scan via [`IgnoreCache::swap_in`].
#[derive(Debug, Clone, Default)]
pub struct IgnoreCache {
    memo: FxHashMap<(String, bool), bool>,
    next: FxHashMap<(String, bool), bool>,
}

impl IgnoreCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates (with memoization) whether `relative_path` is ignored.
    pub fn evaluate(&mut self, set: &IgnoreSet, relative_path: &str, is_dir: bool) -> bool {
        let key = (relative_path.to_owned(), is_dir);
        let result = if let Some(&cached) = self.memo.get(&key) {
            cached
        } else {
            set.is_ignored(relative_path, is_dir)
        };
        self.next.insert(key, result);
        result
    }

    /// Promotes this scan's lookups to become the memoization base for the
    /// next scan, discarding entries for paths that were not visited.
    pub fn swap_in(&mut self) {
        self.memo = std::mem::take(&mut self.next);
    }
}

/// Whether `name` (a single path component, not a full path) is a
/// conventional VCS directory name.
#[must_use]
pub fn is_vcs_directory_name(name: &str) -> bool {
    VCS_DIRECTORIES.contains(&name)
}

/// Whether any component of `relative_path` is a conventional VCS directory.
#[must_use]
pub fn contains_vcs_directory(relative_path: &Path) -> bool {
    relative_path
        .components()
        .any(|c| matches!(c.as_os_str().to_str(), Some(name) if is_vcs_directory_name(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unanchored_pattern_matches_any_depth() {
        let set = IgnoreSet::parse(&["*.log"]).unwrap();
        assert!(set.is_ignored("app.log", false));
        assert!(set.is_ignored("nested/dir/app.log", false));
        assert!(!set.is_ignored("data.txt", false));
    }

    #[test]
    fn anchored_pattern_matches_only_from_root() {
        let set = IgnoreSet::parse(&["/build"]).unwrap();
        assert!(set.is_ignored("build", true));
        assert!(!set.is_ignored("nested/build", true));
    }

    #[test]
    fn negated_rule_re_includes() {
        let set = IgnoreSet::parse(&["*.log", "!important.log"]).unwrap();
        assert!(set.is_ignored("app.log", false));
        assert!(!set.is_ignored("important.log", false));
    }

    #[test]
    fn later_rule_wins_over_earlier() {
        let set = IgnoreSet::parse(&["!keep.txt", "keep.txt"]).unwrap();
        assert!(set.is_ignored("keep.txt", false));
    }

    #[test]
    fn directory_only_pattern_requires_directory() {
        let set = IgnoreSet::parse(&["build/"]).unwrap();
        assert!(set.is_ignored("build", true));
        assert!(!set.is_ignored("build", false));
    }

    #[test]
    fn empty_pattern_is_rejected() {
        assert_eq!(IgnoreSet::parse(&[""]), Err(FilterError::EmptyPattern));
    }

    #[test]
    fn cache_memoizes_and_can_be_rotated() {
        let set = IgnoreSet::parse(&["*.tmp"]).unwrap();
        let mut cache = IgnoreCache::new();
        assert!(cache.evaluate(&set, "a.tmp", false));
        assert!(cache.evaluate(&set, "a.tmp", false));
        cache.swap_in();
        assert!(cache.evaluate(&set, "a.tmp", false));
    }

    #[test]
    fn vcs_directory_detection() {
        assert!(is_vcs_directory_name(".git"));
        assert!(!is_vcs_directory_name("git"));
        assert!(contains_vcs_directory(Path::new("project/.git/HEAD")));
        assert!(!contains_vcs_directory(Path::new("project/src/lib.rs")));
    }
}
