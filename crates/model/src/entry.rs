//! The [`Entry`] sum type and its validation rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors produced while validating or manipulating an [`Entry`] tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// A directory entry name was empty, contained `/`, or was `.`/`..`.
    #[error("invalid entry name {0:?}")]
    InvalidName(String),
    /// The tree's total entry count exceeds the configured maximum.
    #[error("entry count {actual} exceeds maximum {maximum}")]
    TooManyEntries {
        /// The number of entries encountered before the limit was hit.
        actual: u64,
        /// The configured maximum.
        maximum: u64,
    },
    /// A symbolic link target was empty.
    #[error("symbolic link target is empty")]
    EmptySymlinkTarget,
    /// A portable-mode symbolic link target escaped the synchronization root.
    #[error("symbolic link target {0:?} escapes the synchronization root")]
    SymlinkEscapesRoot(String),
}

/// Result type for entry operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// The unit of the synchronizable tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry {
    /// An ordered mapping from child name to child entry.
    Directory {
        /// Children, keyed by name. A `BTreeMap` keeps iteration (and thus
        /// encoding) order deterministic without a separate sort step.
        contents: BTreeMap<String, Entry>,
    },
    /// A regular file, identified by the digest of its content.
    File {
        /// Content digest, using the algorithm fixed for the owning session.
        digest: Vec<u8>,
        /// Whether the file's executable bit is set.
        executable: bool,
    },
    /// A symbolic link.
    SymbolicLink {
        /// The link's target, in the form dictated by the session's
        /// `symbolicLinkMode`.
        target: String,
    },
    /// A placeholder for content the scanner intentionally declined to
    /// read (device nodes, sockets, FIFOs, and the like).
    Untracked,
    /// A placeholder carrying a human-readable explanation for content that
    /// could not be read.
    Problematic {
        /// Description of why the entry could not be scanned.
        problem: String,
    },
}

/// The discriminant of an [`Entry`], used where only the kind (not the
/// payload) matters, e.g. when comparing an ancestor transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// See [`Entry::Directory`].
    Directory,
    /// See [`Entry::File`].
    File,
    /// See [`Entry::SymbolicLink`].
    SymbolicLink,
    /// See [`Entry::Untracked`].
    Untracked,
    /// See [`Entry::Problematic`].
    Problematic,
}

impl Entry {
    /// Constructs an empty directory.
    #[must_use]
    pub fn empty_directory() -> Self {
        Self::Directory {
            contents: BTreeMap::new(),
        }
    }

    /// This entry's [`EntryKind`].
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Directory { .. } => EntryKind::Directory,
            Self::File { .. } => EntryKind::File,
            Self::SymbolicLink { .. } => EntryKind::SymbolicLink,
            Self::Untracked => EntryKind::Untracked,
            Self::Problematic { .. } => EntryKind::Problematic,
        }
    }

    /// Whether this entry (or any of its descendants) is [`Entry::Problematic`].
    #[must_use]
    pub fn has_problems(&self) -> bool {
        match self {
            Self::Problematic { .. } => true,
            Self::Directory { contents } => contents.values().any(Entry::has_problems),
            _ => false,
        }
    }

    /// Total number of entries in the tree rooted at `self`, including
    /// `self`.
    #[must_use]
    pub fn count(&self) -> u64 {
        match self {
            Self::Directory { contents } => {
                1 + contents.values().map(Entry::count).sum::<u64>()
            }
            _ => 1,
        }
    }

    /// Looks up a descendant by its slash-separated relative path.
    /// An empty path returns `self`.
    #[must_use]
    pub fn get(&self, relative_path: &str) -> Option<&Entry> {
        if relative_path.is_empty() {
            return Some(self);
        }
        let mut current = self;
        for component in relative_path.split('/') {
            let Self::Directory { contents } = current else {
                return None;
            };
            current = contents.get(component)?;
        }
        Some(current)
    }

    /// Validates name legality, tree shape, and symlink-target legality,
    /// and rejects trees whose total entry count exceeds `maximum` (0 means
    /// unlimited).
    pub fn validate(&self, maximum: u64) -> Result<()> {
        let mut count: u64 = 0;
        self.validate_recursive(maximum, &mut count)
    }

    fn validate_recursive(&self, maximum: u64, count: &mut u64) -> Result<()> {
        *count += 1;
        if maximum != 0 && *count > maximum {
            return Err(ModelError::TooManyEntries {
                actual: *count,
                maximum,
            });
        }
        match self {
            Self::Directory { contents } => {
                for (name, child) in contents {
                    validate_name(name)?;
                    child.validate_recursive(maximum, count)?;
                }
                Ok(())
            }
            Self::SymbolicLink { target } => {
                if target.is_empty() {
                    return Err(ModelError::EmptySymlinkTarget);
                }
                Ok(())
            }
            Self::File { .. } | Self::Untracked | Self::Problematic { .. } => Ok(()),
        }
    }

    /// Serializes the tree using the workspace's deterministic wire
    /// encoding.
    pub fn encode(&self) -> std::result::Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserializes a tree previously produced by [`Entry::encode`].
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(ModelError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// Validates that a portable-mode symbolic link `target` is a relative
/// POSIX path that does not escape above the synchronization root.
pub fn validate_portable_symlink_target(target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(ModelError::EmptySymlinkTarget);
    }
    if target.starts_with('/') {
        return Err(ModelError::SymlinkEscapesRoot(target.to_owned()));
    }
    let mut depth: i64 = 0;
    for component in target.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return Err(ModelError::SymlinkEscapesRoot(target.to_owned()));
                }
            }
            _ => depth += 1,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Entry {
        let mut root = BTreeMap::new();
        root.insert(
            "foo".to_owned(),
            Entry::File {
                digest: vec![1, 2, 3],
                executable: false,
            },
        );
        let mut nested = BTreeMap::new();
        nested.insert(
            "link".to_owned(),
            Entry::SymbolicLink {
                target: "../foo".to_owned(),
            },
        );
        root.insert("nested".to_owned(), Entry::Directory { contents: nested });
        Entry::Directory { contents: root }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let tree = sample_tree();
        let encoded = tree.encode().unwrap();
        let decoded = Entry::decode(&encoded).unwrap();
        assert_eq!(tree, decoded);
    }

    #[test]
    fn encoding_is_deterministic() {
        let tree = sample_tree();
        assert_eq!(tree.encode().unwrap(), tree.encode().unwrap());
    }

    #[test]
    fn count_includes_self_and_descendants() {
        assert_eq!(sample_tree().count(), 4);
        assert_eq!(Entry::empty_directory().count(), 1);
    }

    #[test]
    fn rejects_invalid_names() {
        let mut contents = BTreeMap::new();
        contents.insert("..".to_owned(), Entry::Untracked);
        let tree = Entry::Directory { contents };
        assert_eq!(
            tree.validate(0),
            Err(ModelError::InvalidName("..".to_owned()))
        );
    }

    #[test]
    fn enforces_maximum_entry_count() {
        let tree = sample_tree();
        assert!(tree.validate(4).is_ok());
        assert_eq!(
            tree.validate(2),
            Err(ModelError::TooManyEntries {
                actual: 3,
                maximum: 2
            })
        );
    }

    #[test]
    fn get_resolves_nested_paths() {
        let tree = sample_tree();
        assert!(matches!(tree.get("nested/link"), Some(Entry::SymbolicLink { .. })));
        assert!(tree.get("missing").is_none());
        assert_eq!(tree.get(""), Some(&tree));
    }

    #[test]
    fn has_problems_detects_nested_problem() {
        let mut contents = BTreeMap::new();
        contents.insert(
            "bad".to_owned(),
            Entry::Problematic {
                problem: "permission denied".to_owned(),
            },
        );
        let tree = Entry::Directory { contents };
        assert!(tree.has_problems());
        assert!(!Entry::empty_directory().has_problems());
    }

    #[test]
    fn portable_symlink_validation_rejects_escapes() {
        assert!(validate_portable_symlink_target("a/b").is_ok());
        assert!(validate_portable_symlink_target("../outside").is_err());
        assert!(validate_portable_symlink_target("a/../b").is_ok());
        assert!(validate_portable_symlink_target("a/../../b").is_err());
        assert!(validate_portable_symlink_target("/absolute").is_err());
        assert!(validate_portable_symlink_target("").is_err());
    }
}
