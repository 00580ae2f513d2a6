#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! The three-way reconciliation algorithm: given an ancestor tree and the
//! two endpoints' current trees, produce the per-path [`Change`] lists each
//! side must apply and the [`Conflict`] list for paths that changed
//! divergently on both sides.
//!
//! # Design
//!
//! [`reconcile`] walks the union of paths present in the ancestor, alpha,
//! and beta trees. At each path it classifies the transition on each side
//! relative to the ancestor (unchanged, or changed to some new value). A
//! path where only one side changed propagates that change to the other;
//! a path where both changed identically requires no action (the sides
//! already agree); a path where both changed but differently is resolved
//! according to [`model::SynchronizationMode`]. Divergent directories are
//! not treated as a single conflicting unit — their children are diffed
//! recursively so that non-overlapping additions inside the same new
//! directory on both sides still merge cleanly.
//!
//! # Invariants
//!
//! - `reconcile(A, A, A, ..)` (ancestor equal to both current trees)
//!   produces no changes and no conflicts, for any mode.
//! - A path where either side currently holds [`model::Entry::Problematic`]
//!   never appears in a [`Change`] or [`Conflict`]; it is reported via
//!   [`ReconcileOutcome::problematic_paths`] instead and the ancestor for
//!   that path is left untouched.
//! - In [`model::SynchronizationMode::OneWayReplica`], `beta_changes` is
//!   the only non-empty list and `conflicts` is always empty.

mod change;
mod diff;

pub use change::{Change, Conflict};

use model::{Entry, SynchronizationMode};

/// Everything one call to [`reconcile`] produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Changes alpha must apply to reach agreement with beta.
    pub alpha_changes: Vec<Change>,
    /// Changes beta must apply to reach agreement with alpha.
    pub beta_changes: Vec<Change>,
    /// Paths that changed divergently on both sides and were not
    /// automatically resolved.
    pub conflicts: Vec<Conflict>,
    /// Paths skipped because one side currently holds a
    /// [`model::Entry::Problematic`] placeholder there.
    pub problematic_paths: Vec<String>,
}

impl ReconcileOutcome {
    /// Whether this outcome carries no changes, conflicts, or problems —
    /// i.e. the three trees already fully agree.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alpha_changes.is_empty()
            && self.beta_changes.is_empty()
            && self.conflicts.is_empty()
            && self.problematic_paths.is_empty()
    }
}

/// Three-way reconciles `ancestor` against `alpha` and `beta`, applying
/// `mode`'s conflict resolution policy. `alpha_wins` resolves divergent
/// conflicts in [`SynchronizationMode::TwoWayResolved`] (the session's
/// `alphaWinsOnConflict`/`betaWinsOnConflict` hint, defaulting to `true`
/// when neither is set).
#[must_use]
pub fn reconcile(
    ancestor: &Entry,
    alpha: &Entry,
    beta: &Entry,
    mode: SynchronizationMode,
    alpha_wins: bool,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    if mode == SynchronizationMode::OneWayReplica {
        diff::replicate(alpha, beta, &mut outcome);
    } else {
        diff::diff_node(
            "",
            Some(ancestor),
            Some(alpha),
            Some(beta),
            mode,
            alpha_wins,
            &mut outcome,
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn file(byte: u8) -> Entry {
        Entry::File {
            digest: vec![byte],
            executable: false,
        }
    }

    fn dir(entries: &[(&str, Entry)]) -> Entry {
        let mut contents = BTreeMap::new();
        for (name, entry) in entries {
            contents.insert((*name).to_owned(), entry.clone());
        }
        Entry::Directory { contents }
    }

    #[test]
    fn identical_trees_produce_no_changes() {
        let tree = dir(&[("foo", file(1))]);
        let outcome = reconcile(&tree, &tree, &tree, SynchronizationMode::TwoWaySafe, true);
        assert!(outcome.is_empty());
    }

    #[test]
    fn scenario_bidirectional_propagation() {
        let ancestor = dir(&[]);
        let alpha = dir(&[("foo", file(1))]);
        let beta = dir(&[]);
        let outcome = reconcile(&ancestor, &alpha, &beta, SynchronizationMode::TwoWaySafe, true);
        assert!(outcome.conflicts.is_empty());
        assert!(outcome.alpha_changes.is_empty());
        assert_eq!(outcome.beta_changes.len(), 1);
        assert_eq!(outcome.beta_changes[0].path, "foo");
        assert_eq!(outcome.beta_changes[0].new, Some(file(1)));
    }

    #[test]
    fn scenario_conflict_in_safe_mode() {
        let ancestor = dir(&[("foo", file(0))]);
        let alpha = dir(&[("foo", file(1))]);
        let beta = dir(&[("foo", file(2))]);
        let outcome = reconcile(&ancestor, &alpha, &beta, SynchronizationMode::TwoWaySafe, true);
        assert!(outcome.alpha_changes.is_empty());
        assert!(outcome.beta_changes.is_empty());
        assert_eq!(outcome.conflicts.len(), 1);
        let conflict = &outcome.conflicts[0];
        assert_eq!(conflict.path, "foo");
        assert_eq!(conflict.alpha_change.old, Some(file(0)));
        assert_eq!(conflict.alpha_change.new, Some(file(1)));
        assert_eq!(conflict.beta_change.old, Some(file(0)));
        assert_eq!(conflict.beta_change.new, Some(file(2)));
    }

    #[test]
    fn scenario_conflict_in_replica_mode() {
        let ancestor = dir(&[("foo", file(0))]);
        let alpha = dir(&[("foo", file(1))]);
        let beta = dir(&[("foo", file(2))]);
        let outcome = reconcile(&ancestor, &alpha, &beta, SynchronizationMode::OneWayReplica, true);
        assert!(outcome.conflicts.is_empty());
        assert!(outcome.alpha_changes.is_empty());
        assert_eq!(outcome.beta_changes.len(), 1);
        assert_eq!(outcome.beta_changes[0].new, Some(file(1)));
    }

    #[test]
    fn scenario_deletion_propagation() {
        let ancestor = dir(&[("bar", file(9))]);
        let alpha = dir(&[]);
        let beta = dir(&[("bar", file(9))]);
        let outcome = reconcile(&ancestor, &alpha, &beta, SynchronizationMode::TwoWaySafe, true);
        assert_eq!(outcome.beta_changes.len(), 1);
        assert_eq!(outcome.beta_changes[0].old, Some(file(9)));
        assert_eq!(outcome.beta_changes[0].new, None);
    }

    #[test]
    fn two_way_resolved_favors_configured_winner() {
        let ancestor = dir(&[("foo", file(0))]);
        let alpha = dir(&[("foo", file(1))]);
        let beta = dir(&[("foo", file(2))]);

        let alpha_wins = reconcile(&ancestor, &alpha, &beta, SynchronizationMode::TwoWayResolved, true);
        assert_eq!(alpha_wins.beta_changes[0].new, Some(file(1)));
        assert!(alpha_wins.alpha_changes.is_empty());

        let beta_wins = reconcile(&ancestor, &alpha, &beta, SynchronizationMode::TwoWayResolved, false);
        assert_eq!(beta_wins.alpha_changes[0].new, Some(file(2)));
        assert!(beta_wins.beta_changes.is_empty());
    }

    #[test]
    fn one_way_safe_reports_unexpected_beta_divergence_as_conflict() {
        let ancestor = dir(&[("foo", file(0))]);
        let alpha = dir(&[("foo", file(0))]);
        let beta = dir(&[("foo", file(2))]);
        let outcome = reconcile(&ancestor, &alpha, &beta, SynchronizationMode::OneWaySafe, true);
        assert!(outcome.alpha_changes.is_empty());
        assert!(outcome.beta_changes.is_empty());
        assert_eq!(outcome.conflicts.len(), 1);
    }

    #[test]
    fn non_overlapping_additions_in_a_shared_new_directory_merge_without_conflict() {
        let ancestor = dir(&[]);
        let alpha = dir(&[("shared", dir(&[("a", file(1))]))]);
        let beta = dir(&[("shared", dir(&[("b", file(2))]))]);
        let outcome = reconcile(&ancestor, &alpha, &beta, SynchronizationMode::TwoWaySafe, true);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.alpha_changes.len(), 1);
        assert_eq!(outcome.alpha_changes[0].path, "shared/b");
        assert_eq!(outcome.beta_changes.len(), 1);
        assert_eq!(outcome.beta_changes[0].path, "shared/a");
    }

    #[test]
    fn problematic_entries_are_never_propagated() {
        let ancestor = dir(&[("foo", file(0))]);
        let alpha = dir(&[(
            "foo",
            Entry::Problematic {
                problem: "permission denied".to_owned(),
            },
        )]);
        let beta = dir(&[("foo", file(0))]);
        let outcome = reconcile(&ancestor, &alpha, &beta, SynchronizationMode::TwoWaySafe, true);
        assert!(outcome.alpha_changes.is_empty());
        assert!(outcome.beta_changes.is_empty());
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.problematic_paths, vec!["foo".to_owned()]);
    }
}
