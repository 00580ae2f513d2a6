//! The recursive three-way diff and the one-way-replica special case.

use crate::change::{Change, Conflict};
use crate::ReconcileOutcome;
use model::{Entry, SynchronizationMode};
use std::collections::BTreeMap;

fn is_problematic(entry: Option<&Entry>) -> bool {
    matches!(entry, Some(Entry::Problematic { .. }))
}

fn directory_contents(entry: Option<&Entry>) -> Option<&BTreeMap<String, Entry>> {
    match entry {
        Some(Entry::Directory { contents }) => Some(contents),
        _ => None,
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_owned()
    } else {
        format!("{path}/{name}")
    }
}

fn union_keys<'a>(maps: &[Option<&'a BTreeMap<String, Entry>>]) -> Vec<&'a str> {
    let mut keys: Vec<&str> = Vec::new();
    for map in maps.iter().flatten() {
        for name in map.keys() {
            if !keys.contains(&name.as_str()) {
                keys.push(name.as_str());
            }
        }
    }
    keys.sort_unstable();
    keys
}

/// Recursively diffs `ancestor`/`alpha`/`beta` at `path`, accumulating
/// changes and conflicts into `out` per `mode`'s resolution policy.
/// `mode` must not be [`SynchronizationMode::OneWayReplica`]; that mode is
/// handled entirely by [`replicate`].
pub(crate) fn diff_node(
    path: &str,
    ancestor: Option<&Entry>,
    alpha: Option<&Entry>,
    beta: Option<&Entry>,
    mode: SynchronizationMode,
    alpha_wins: bool,
    out: &mut ReconcileOutcome,
) {
    if is_problematic(alpha) || is_problematic(beta) {
        out.problematic_paths.push(path.to_owned());
        return;
    }

    if alpha == ancestor && beta == ancestor {
        return;
    }

    let alpha_changed = alpha != ancestor;
    let beta_changed = beta != ancestor;

    if alpha_changed && !beta_changed {
        propagate(path, beta, alpha, Side::Beta, out);
        return;
    }

    if beta_changed && !alpha_changed {
        match mode {
            SynchronizationMode::TwoWaySafe | SynchronizationMode::TwoWayResolved => {
                propagate(path, alpha, beta, Side::Alpha, out);
            }
            SynchronizationMode::OneWaySafe => {
                record_conflict(path, ancestor, alpha, beta, out);
            }
            SynchronizationMode::OneWayReplica => unreachable!("handled by replicate"),
        }
        return;
    }

    // Both sides changed.
    if alpha == beta {
        return;
    }

    if let (Some(a_contents), Some(b_contents)) =
        (directory_contents(alpha), directory_contents(beta))
    {
        let ancestor_contents = directory_contents(ancestor);
        for name in union_keys(&[ancestor_contents, Some(a_contents), Some(b_contents)]) {
            diff_node(
                &join(path, name),
                ancestor_contents.and_then(|m| m.get(name)),
                a_contents.get(name),
                b_contents.get(name),
                mode,
                alpha_wins,
                out,
            );
        }
        return;
    }

    match mode {
        SynchronizationMode::TwoWaySafe | SynchronizationMode::OneWaySafe => {
            record_conflict(path, ancestor, alpha, beta, out);
        }
        SynchronizationMode::TwoWayResolved => {
            if alpha_wins {
                propagate(path, beta, alpha, Side::Beta, out);
            } else {
                propagate(path, alpha, beta, Side::Alpha, out);
            }
        }
        SynchronizationMode::OneWayReplica => unreachable!("handled by replicate"),
    }
}

/// Which side's change list a [`propagate`] call targets.
#[derive(Clone, Copy)]
enum Side {
    Alpha,
    Beta,
}

impl Side {
    fn changes<'a>(self, out: &'a mut ReconcileOutcome) -> &'a mut Vec<Change> {
        match self {
            Self::Alpha => &mut out.alpha_changes,
            Self::Beta => &mut out.beta_changes,
        }
    }
}

/// Propagates `source`'s value onto `target_current`, recursing into
/// matching directories to keep changes as granular as possible instead of
/// replacing an entire subtree when only part of it actually changed.
/// A [`model::Entry::Problematic`] anywhere under `source` aborts
/// propagation for that path and is recorded in `out.problematic_paths`
/// instead.
fn propagate(
    path: &str,
    target_current: Option<&Entry>,
    source: Option<&Entry>,
    side: Side,
    out: &mut ReconcileOutcome,
) {
    if is_problematic(source) {
        out.problematic_paths.push(path.to_owned());
        return;
    }
    if target_current == source {
        return;
    }
    if let (Some(current_contents), Some(source_contents)) =
        (directory_contents(target_current), directory_contents(source))
    {
        for name in union_keys(&[Some(current_contents), Some(source_contents)]) {
            propagate(
                &join(path, name),
                current_contents.get(name),
                source_contents.get(name),
                side,
                out,
            );
        }
        return;
    }
    side.changes(out).push(Change::new(path, target_current, source));
}

fn record_conflict(
    path: &str,
    ancestor: Option<&Entry>,
    alpha: Option<&Entry>,
    beta: Option<&Entry>,
    out: &mut ReconcileOutcome,
) {
    out.conflicts.push(Conflict {
        path: path.to_owned(),
        alpha_change: Change::new(path, ancestor, alpha),
        beta_change: Change::new(path, ancestor, beta),
    });
}

/// The [`SynchronizationMode::OneWayReplica`] special case: beta is forced
/// to match alpha wherever they differ, regardless of the ancestor or any
/// independent beta-side change. Never produces alpha changes or
/// conflicts.
pub(crate) fn replicate(alpha: &Entry, beta: &Entry, out: &mut ReconcileOutcome) {
    propagate_replica("", Some(beta), Some(alpha), out);
}

fn propagate_replica(path: &str, beta: Option<&Entry>, alpha: Option<&Entry>, out: &mut ReconcileOutcome) {
    if is_problematic(alpha) {
        out.problematic_paths.push(path.to_owned());
        return;
    }
    if beta == alpha {
        return;
    }
    if let (Some(beta_contents), Some(alpha_contents)) =
        (directory_contents(beta), directory_contents(alpha))
    {
        for name in union_keys(&[Some(beta_contents), Some(alpha_contents)]) {
            propagate_replica(
                &join(path, name),
                beta_contents.get(name),
                alpha_contents.get(name),
                out,
            );
        }
        return;
    }
    out.beta_changes.push(Change::new(path, beta, alpha));
}
