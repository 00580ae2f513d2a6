//! The [`Change`] and [`Conflict`] record types the reconciler produces.

use model::Entry;
use serde::{Deserialize, Serialize};

/// A single path's desired transition on one side. `old` must match the
/// entry currently present at `path` on the side this change targets;
/// `new` is the desired entry, or `None` to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// The path this change applies to, relative to the synchronization
    /// root.
    pub path: String,
    /// The entry the target side must currently hold at `path` for this
    /// change to apply cleanly.
    pub old: Option<Entry>,
    /// The desired entry, or `None` to delete whatever is at `path`.
    pub new: Option<Entry>,
}

impl Change {
    /// Constructs a change, cloning `old`/`new` from optional entry
    /// references.
    #[must_use]
    pub fn new(path: impl Into<String>, old: Option<&Entry>, new: Option<&Entry>) -> Self {
        Self {
            path: path.into(),
            old: old.cloned(),
            new: new.cloned(),
        }
    }

    /// Whether this change deletes the entry at its path.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.new.is_none()
    }

    /// Whether this change creates an entry at its path where none existed.
    #[must_use]
    pub fn is_creation(&self) -> bool {
        self.old.is_none()
    }
}

/// A path that changed divergently on both sides and was not automatically
/// resolved: each side's attempted transition away from the ancestor,
/// relative to the same `old` ancestor value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The path in conflict.
    pub path: String,
    /// Alpha's attempted transition away from the ancestor.
    pub alpha_change: Change,
    /// Beta's attempted transition away from the ancestor.
    pub beta_change: Change,
}
