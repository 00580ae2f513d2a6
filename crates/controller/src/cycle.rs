//! Pure cycle helpers: error classification, the stage→supply→receive
//! pipeline for one side, applying a change batch to a pre-cycle snapshot,
//! and the ancestor-merge rule that advances the ancestor only where both
//! sides actually converged this cycle.

use endpoint::{Endpoint, EndpointError, Result, SupplyFrame};
use model::Entry;
use reconcile::Change;
use rsync::Frame;
use stage::StageRequest;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a failed [`Endpoint`] call should be handled by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A connection or local I/O hiccup; disconnect and retry with
    /// backoff.
    Transient,
    /// A protocol violation or an oversize tree; the session cannot
    /// recover and must terminate.
    Fatal,
    /// The call was cancelled by the controller itself (pause or
    /// terminate), not a failure.
    Cancelled,
}

/// Classifies an [`EndpointError`] per the error taxonomy: transient I/O
/// backs off and retries, protocol violations and oversize trees are
/// fatal, cancellation is neither.
#[must_use]
pub fn classify(error: &EndpointError) -> ErrorClass {
    match error {
        EndpointError::Cancelled => ErrorClass::Cancelled,
        EndpointError::Protocol(_)
        | EndpointError::UnexpectedResponse(_)
        | EndpointError::ConnectionClosed => ErrorClass::Fatal,
        EndpointError::Scan(scan::ScanError::InvalidTree(model::ModelError::TooManyEntries {
            ..
        })) => ErrorClass::Fatal,
        EndpointError::Scan(_) | EndpointError::Stage(_) | EndpointError::Io(_) | EndpointError::Remote(_) => {
            ErrorClass::Transient
        }
    }
}

/// Counts `Problematic` entries anywhere in `entry`'s subtree.
#[must_use]
pub fn count_problematic(entry: &Entry) -> u64 {
    match entry {
        Entry::Problematic { .. } => 1,
        Entry::Directory { contents } => contents.values().map(count_problematic).sum(),
        Entry::File { .. } | Entry::SymbolicLink { .. } | Entry::Untracked => 0,
    }
}

/// Collects every `Entry::File` staging request needed to realize
/// `changes`, keyed by path relative to the synchronization root. Dives
/// into a directory change's nested contents so a brand-new subtree's
/// files are all staged in the same cycle that creates the subtree,
/// rather than one nesting level per cycle.
fn stage_requests(changes: &[Change]) -> (HashMap<String, Vec<u8>>, Vec<StageRequest>) {
    let mut digests: HashMap<String, Vec<u8>> = HashMap::new();
    let mut requests = Vec::new();
    for change in changes {
        if let Some(new_entry) = &change.new {
            collect_file_requests(&change.path, new_entry, &mut digests, &mut requests);
        }
    }
    (digests, requests)
}

fn collect_file_requests(
    path: &str,
    entry: &Entry,
    digests: &mut HashMap<String, Vec<u8>>,
    requests: &mut Vec<StageRequest>,
) {
    match entry {
        Entry::File { digest, .. } => {
            digests.insert(path.to_owned(), digest.clone());
            requests.push(StageRequest {
                path: path.to_owned(),
                digest: digest.clone(),
            });
        }
        Entry::Directory { contents } => {
            for (name, child) in contents {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}/{name}")
                };
                collect_file_requests(&child_path, child, digests, requests);
            }
        }
        Entry::SymbolicLink { .. } | Entry::Untracked | Entry::Problematic { .. } => {}
    }
}

/// Stages `changes`' file content onto `target` by requesting a stage plan
/// from `target`, pulling the needed content from `source` via `Supply`,
/// and handing each path's complete frame stream to `target.receive` as
/// soon as it completes.
pub async fn stage_changes(
    source: &Arc<dyn Endpoint>,
    target: &Arc<dyn Endpoint>,
    changes: &[Change],
    cancellation: &CancellationToken,
) -> Result<()> {
    let (digests, requests) = stage_requests(changes);

    if requests.is_empty() {
        return Ok(());
    }

    let response = target.stage(requests, cancellation).await?;
    if response.paths_needed.is_empty() {
        return Ok(());
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<SupplyFrame>();
    source
        .supply(
            response.paths_needed.clone(),
            response.signatures.clone(),
            tx,
            cancellation,
        )
        .await?;

    let mut buffers: HashMap<String, Vec<Frame>> = HashMap::new();
    while let Ok(frame) = rx.try_recv() {
        buffers.entry(frame.path).or_default().push(frame.frame);
    }

    for path in &response.paths_needed {
        let frames = buffers.remove(path).unwrap_or_default();
        let digest = digests.get(path).cloned().unwrap_or_default();
        let signature = response
            .signatures
            .get(path)
            .cloned()
            .expect("a stage response pairs a signature with every needed path");
        target
            .receive(path.clone(), digest, signature, frames, cancellation)
            .await?;
    }
    Ok(())
}

/// Applies the subset of `changes` whose path appears in `applied` to
/// `snapshot`, producing the tree that side will hold once its transition
/// completes. Changes whose path is not in `applied` (a transition
/// problem) leave `snapshot` untouched at that path.
#[must_use]
pub fn apply_changes(mut snapshot: Entry, changes: &[Change], applied: &[String]) -> Entry {
    let applied: HashSet<&str> = applied.iter().map(String::as_str).collect();
    for change in changes {
        if applied.contains(change.path.as_str()) {
            snapshot = set_at_path(snapshot, &change.path, change.new.clone());
        }
    }
    snapshot
}

fn set_at_path(tree: Entry, path: &str, value: Option<Entry>) -> Entry {
    match path.split_once('/') {
        None => set_child(tree, path, value),
        Some((head, rest)) => match tree {
            Entry::Directory { mut contents } => {
                let child = contents.remove(head).unwrap_or_else(Entry::empty_directory);
                contents.insert(head.to_owned(), set_at_path(child, rest, value));
                Entry::Directory { contents }
            }
            other => other,
        },
    }
}

fn set_child(tree: Entry, name: &str, value: Option<Entry>) -> Entry {
    match tree {
        Entry::Directory { mut contents } => {
            match value {
                Some(entry) => {
                    contents.insert(name.to_owned(), entry);
                }
                None => {
                    contents.remove(name);
                }
            }
            Entry::Directory { contents }
        }
        other => other,
    }
}

fn directory_contents(entry: Option<&Entry>) -> Option<&BTreeMap<String, Entry>> {
    match entry {
        Some(Entry::Directory { contents }) => Some(contents),
        _ => None,
    }
}

/// Advances the ancestor to wherever `alpha_final` and `beta_final` now
/// agree, recursing into directories to salvage partial convergence, and
/// otherwise keeping `ancestor`'s existing value — which is exactly the
/// paths a conflict, a problematic entry, or a failed transition left the
/// two sides disagreeing on.
#[must_use]
pub fn merge_ancestor(ancestor: Option<&Entry>, alpha_final: Option<&Entry>, beta_final: Option<&Entry>) -> Option<Entry> {
    if alpha_final == beta_final {
        return alpha_final.cloned();
    }
    match (directory_contents(alpha_final), directory_contents(beta_final)) {
        (Some(alpha_contents), Some(beta_contents)) => {
            let ancestor_contents = directory_contents(ancestor);
            let mut names: Vec<&String> = Vec::new();
            for map in [ancestor_contents, Some(alpha_contents), Some(beta_contents)]
                .into_iter()
                .flatten()
            {
                for name in map.keys() {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
            names.sort();
            let mut merged = BTreeMap::new();
            for name in names {
                let child = merge_ancestor(
                    ancestor_contents.and_then(|m| m.get(name)),
                    alpha_contents.get(name),
                    beta_contents.get(name),
                );
                if let Some(child) = child {
                    merged.insert(name.clone(), child);
                }
            }
            Some(Entry::Directory { contents: merged })
        }
        _ => ancestor.cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Entry;

    fn file(digest: &[u8]) -> Entry {
        Entry::File {
            digest: digest.to_vec(),
            executable: false,
        }
    }

    #[test]
    fn stage_requests_recurses_into_a_directory_changes_nested_files() {
        let mut nested = BTreeMap::new();
        nested.insert("inner.txt".to_owned(), file(b"2"));
        let mut contents = BTreeMap::new();
        contents.insert("top.txt".to_owned(), file(b"1"));
        contents.insert("sub".to_owned(), Entry::Directory { contents: nested });
        let new_directory = Entry::Directory { contents };
        let changes = vec![Change::new("dir", None, Some(&new_directory))];

        let (digests, requests) = stage_requests(&changes);

        let mut paths: Vec<&str> = requests.iter().map(|request| request.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["dir/sub/inner.txt", "dir/top.txt"]);
        assert_eq!(digests.get("dir/top.txt"), Some(&b"1".to_vec()));
        assert_eq!(digests.get("dir/sub/inner.txt"), Some(&b"2".to_vec()));
    }

    #[test]
    fn stage_requests_ignores_changes_with_no_file_content() {
        let changes = vec![
            Change::new("removed.txt", Some(&file(b"1")), None),
            Change::new(
                "link",
                None,
                Some(&Entry::SymbolicLink {
                    target: "elsewhere".to_owned(),
                }),
            ),
        ];
        let (digests, requests) = stage_requests(&changes);
        assert!(requests.is_empty());
        assert!(digests.is_empty());
    }

    #[test]
    fn count_problematic_sums_across_a_tree() {
        let mut contents = BTreeMap::new();
        contents.insert("a".to_owned(), Entry::Problematic { problem: "x".to_owned() });
        contents.insert("b".to_owned(), file(b"d"));
        let tree = Entry::Directory { contents };
        assert_eq!(count_problematic(&tree), 1);
    }

    #[test]
    fn apply_changes_only_applies_successfully_transitioned_paths() {
        let base = Entry::empty_directory();
        let changes = vec![
            Change::new("kept.txt", None, Some(&file(b"1"))),
            Change::new("dropped.txt", None, Some(&file(b"2"))),
        ];
        let applied = vec!["kept.txt".to_owned()];
        let result = apply_changes(base, &changes, &applied);
        assert!(result.get("kept.txt").is_some());
        assert!(result.get("dropped.txt").is_none());
    }

    #[test]
    fn merge_ancestor_advances_where_both_sides_agree_and_holds_where_they_differ() {
        let ancestor = Entry::empty_directory();
        let mut alpha_contents = BTreeMap::new();
        alpha_contents.insert("agreed.txt".to_owned(), file(b"x"));
        alpha_contents.insert("conflicted.txt".to_owned(), file(b"a"));
        let alpha = Entry::Directory { contents: alpha_contents };

        let mut beta_contents = BTreeMap::new();
        beta_contents.insert("agreed.txt".to_owned(), file(b"x"));
        beta_contents.insert("conflicted.txt".to_owned(), file(b"b"));
        let beta = Entry::Directory { contents: beta_contents };

        let merged = merge_ancestor(Some(&ancestor), Some(&alpha), Some(&beta)).expect("merged tree");
        assert_eq!(merged.get("agreed.txt"), Some(&file(b"x")));
        assert_eq!(merged.get("conflicted.txt"), None);
    }
}
