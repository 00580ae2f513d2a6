//! Atomic, best-effort application of reconciled [`Change`]s to a
//! synchronization root.

use crate::staging::Stager;
use model::{Entry, EntryKind};
use reconcile::Change;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Default mode newly created files adopt when no `defaultFileMode` is
/// configured, matching the session configuration layer's default.
pub const DEFAULT_FILE_MODE: u32 = 0o600;
/// Default mode newly created directories adopt when no
/// `defaultDirectoryMode` is configured.
pub const DEFAULT_DIRECTORY_MODE: u32 = 0o700;

/// Modes and ownership applied to newly created files, directories, and
/// symbolic links in portable mode. `owner`/`group` are resolved numeric
/// identifiers; resolving a symbolic owner/group name to a numeric one is
/// the caller's responsibility (the session configuration layer only
/// records the unresolved identifier).
#[derive(Debug, Clone, Copy)]
pub struct TransitionDefaults {
    /// Mode for newly created regular files (before the executable bit,
    /// if any, is folded in).
    pub file_mode: u32,
    /// Mode for newly created directories.
    pub directory_mode: u32,
    /// Owner applied to newly created entries when set. Applied
    /// best-effort: a platform or filesystem that rejects the change is
    /// logged at `warn` and otherwise ignored, since ownership is
    /// advisory and must never abort a transition.
    pub owner: Option<u32>,
    /// Group applied to newly created entries when set, with the same
    /// best-effort semantics as `owner`.
    pub group: Option<u32>,
}

impl Default for TransitionDefaults {
    fn default() -> Self {
        Self {
            file_mode: DEFAULT_FILE_MODE,
            directory_mode: DEFAULT_DIRECTORY_MODE,
            owner: None,
            group: None,
        }
    }
}

/// Why applying one [`Change`] failed.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The filesystem's current entry at this path no longer matches the
    /// change's recorded pre-state; the change was left unapplied.
    #[error("current entry at {path:?} no longer matches the expected pre-state")]
    StaleEntry {
        /// The path whose current state diverged.
        path: String,
    },
    /// The change creates or updates a file, but no staged content exists
    /// for it (the stage phase for this path never completed).
    #[error("staged content for {path:?} is missing")]
    MissingStagedContent {
        /// The path whose staged content is missing.
        path: String,
    },
    /// An I/O operation applying the change failed.
    #[error("I/O error applying transition at {path:?}: {source}")]
    Io {
        /// The path being transitioned.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A symbolic-link change was encountered on a platform without
    /// symbolic link support.
    #[error("symbolic links are not supported on this platform (path {path:?})")]
    SymlinksUnsupported {
        /// The path the symbolic link would have occupied.
        path: String,
    },
}

/// One change that could not be applied, with the reason.
#[derive(Debug, Error)]
#[error("{path}: {error}")]
pub struct TransitionProblem {
    /// The path whose change failed.
    pub path: String,
    /// Why it failed.
    #[source]
    pub error: TransitionError,
}

/// The result of applying a batch of changes: which paths succeeded and
/// which failed, with why. A partial failure never aborts the remaining
/// changes in the batch.
#[derive(Debug, Default)]
pub struct TransitionOutcome {
    /// Paths whose change applied successfully.
    pub applied: Vec<String>,
    /// Paths whose change failed, and why.
    pub problems: Vec<TransitionProblem>,
}

/// Applies `changes` to `root`, resolving file content from `stager`'s
/// staging directory. Each change is applied independently: one path's
/// failure does not prevent the others from being applied.
pub fn apply(
    root: &Path,
    stager: &Stager,
    changes: &[Change],
    defaults: TransitionDefaults,
) -> TransitionOutcome {
    let mut outcome = TransitionOutcome::default();
    for change in changes {
        match apply_one(root, stager, change, defaults) {
            Ok(()) => {
                tracing::debug!(path = %change.path, "transition applied");
                outcome.applied.push(change.path.clone());
            }
            Err(error) => {
                tracing::warn!(path = %change.path, %error, "transition problem");
                outcome.problems.push(TransitionProblem {
                    path: change.path.clone(),
                    error,
                });
            }
        }
    }
    outcome
}

fn apply_one(
    root: &Path,
    stager: &Stager,
    change: &Change,
    defaults: TransitionDefaults,
) -> Result<(), TransitionError> {
    let target = root.join(&change.path);
    verify_current_matches(&target, change.old.as_ref())?;
    match &change.new {
        None => remove_entry(&target, change.old.as_ref()),
        Some(new_entry) => {
            // The reconciler emits one coarse change per path even when an
            // entire populated subtree is being replaced by something of a
            // different kind (a directory overwritten by a file, say). The
            // old entry has to be cleared depth-first before the new one is
            // written, or the OS's "directory not empty"/"is a directory"
            // checks turn this into a permanent, non-converging failure.
            if change
                .old
                .as_ref()
                .is_some_and(|old| old.kind() != new_entry.kind())
            {
                remove_entry(&target, change.old.as_ref())?;
            }
            install_entry(&target, stager, &change.path, new_entry, defaults)
        }
    }
}

/// Materializes `entry` at `target`/`path`, recursing into a directory's
/// contents so a brand-new subtree is fully realized in the same
/// transition that creates its root instead of one nesting level per
/// cycle.
fn install_entry(
    target: &Path,
    stager: &Stager,
    path: &str,
    entry: &Entry,
    defaults: TransitionDefaults,
) -> Result<(), TransitionError> {
    match entry {
        Entry::Directory { contents } => create_directory_tree(target, path, contents, stager, defaults),
        Entry::File { digest, executable } => install_file(target, stager, path, digest, *executable, defaults),
        Entry::SymbolicLink { target: link_target } => install_symlink(target, link_target, defaults),
        // Untracked content is deliberately never materialized; a
        // Problematic placeholder never appears as `new` at the top level
        // (the reconciler excludes such paths from every `Change` list),
        // but either can appear nested inside a directory being created
        // wholesale, where they are likewise skipped.
        Entry::Untracked | Entry::Problematic { .. } => Ok(()),
    }
}

/// Checks that the filesystem's current entry kind at `target` still
/// matches `expected`'s kind. This is a lightweight staleness check (kind
/// only, not a full content re-digest) that catches the common unsafe case
/// — something else replaced the path between reconciliation and this
/// transition — without re-hashing file content on every apply.
fn verify_current_matches(
    target: &Path,
    expected: Option<&Entry>,
) -> Result<(), TransitionError> {
    let current_kind = match std::fs::symlink_metadata(target) {
        Ok(metadata) => Some(kind_of(&metadata)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
        Err(source) => return Err(io_error(target, source)),
    };
    if current_kind != expected.map(Entry::kind) {
        return Err(TransitionError::StaleEntry {
            path: target.display().to_string(),
        });
    }
    Ok(())
}

fn kind_of(metadata: &std::fs::Metadata) -> EntryKind {
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        EntryKind::SymbolicLink
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Untracked
    }
}

/// Removes whatever `old` recorded at `target`. A populated directory is
/// removed depth-first — each recorded child is removed according to its
/// own recorded kind before the directory itself — so that a single
/// coarse deletion change for an entire subtree converges in one
/// transition instead of failing with "directory not empty" and being
/// retried unchanged forever.
fn remove_entry(target: &Path, old: Option<&Entry>) -> Result<(), TransitionError> {
    match old {
        Some(Entry::Directory { contents }) => remove_directory(target, contents),
        Some(Entry::File { .. } | Entry::SymbolicLink { .. }) => remove_path(target, std::fs::remove_file),
        _ => Ok(()),
    }
}

fn remove_directory(target: &Path, contents: &BTreeMap<String, Entry>) -> Result<(), TransitionError> {
    for (name, child) in contents {
        remove_entry(&target.join(name), Some(child))?;
    }
    remove_path(target, std::fs::remove_dir)
}

fn remove_path(
    target: &Path,
    remove: impl FnOnce(&Path) -> std::io::Result<()>,
) -> Result<(), TransitionError> {
    match remove(target) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_error(target, source)),
    }
}

fn create_directory(target: &Path, defaults: TransitionDefaults) -> Result<(), TransitionError> {
    std::fs::create_dir_all(target).map_err(|source| io_error(target, source))?;
    set_mode(target, defaults.directory_mode)?;
    apply_ownership(target, defaults.owner, defaults.group, false);
    Ok(())
}

/// Creates the directory itself, then recursively installs each recorded
/// child — parent before children, the reverse of [`remove_directory`]'s
/// order — so a wholesale subtree creation is fully realized in one
/// transition rather than one nesting level per cycle.
fn create_directory_tree(
    target: &Path,
    path: &str,
    contents: &BTreeMap<String, Entry>,
    stager: &Stager,
    defaults: TransitionDefaults,
) -> Result<(), TransitionError> {
    create_directory(target, defaults)?;
    for (name, child) in contents {
        install_entry(&target.join(name), stager, &join_path(path, name), child, defaults)?;
    }
    Ok(())
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_owned()
    } else {
        format!("{base}/{name}")
    }
}

fn install_file(
    target: &Path,
    stager: &Stager,
    path: &str,
    digest: &[u8],
    executable: bool,
    defaults: TransitionDefaults,
) -> Result<(), TransitionError> {
    let staged = stager.staged_path(path, digest);
    if !staged.is_file() {
        return Err(TransitionError::MissingStagedContent {
            path: path.to_owned(),
        });
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|source| io_error(target, source))?;
    }
    let mode = if executable {
        defaults.file_mode | 0o111
    } else {
        defaults.file_mode
    };
    set_mode(&staged, mode)?;
    apply_ownership(&staged, defaults.owner, defaults.group, false);
    std::fs::rename(&staged, target).map_err(|source| io_error(target, source))
}

fn install_symlink(
    target: &Path,
    link_target: &str,
    defaults: TransitionDefaults,
) -> Result<(), TransitionError> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|source| io_error(target, source))?;
    }
    // A stale entry at this exact kind was already ruled out by
    // `verify_current_matches`, but a prior failed attempt may have left a
    // partial link behind.
    let _ = std::fs::remove_file(target);
    create_symlink(link_target, target)?;
    apply_ownership(target, defaults.owner, defaults.group, true);
    Ok(())
}

#[cfg(unix)]
fn create_symlink(link_target: &str, target: &Path) -> Result<(), TransitionError> {
    std::os::unix::fs::symlink(link_target, target).map_err(|source| io_error(target, source))
}

#[cfg(not(unix))]
fn create_symlink(_link_target: &str, target: &Path) -> Result<(), TransitionError> {
    Err(TransitionError::SymlinksUnsupported {
        path: target.display().to_string(),
    })
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), TransitionError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|source| io_error(path, source))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), TransitionError> {
    Ok(())
}

/// Applies `owner`/`group` to `path` when either is set, logging and
/// otherwise ignoring any failure: ownership changes commonly fail under
/// restricted privilege, and that must never fail a transition. `is_link`
/// selects `lchown` so a symbolic link's own ownership changes rather than
/// its target's.
#[cfg(unix)]
fn apply_ownership(path: &Path, owner: Option<u32>, group: Option<u32>, is_link: bool) {
    if owner.is_none() && group.is_none() {
        return;
    }
    let result = if is_link {
        std::os::unix::fs::lchown(path, owner, group)
    } else {
        std::os::unix::fs::chown(path, owner, group)
    };
    if let Err(error) = result {
        tracing::warn!(path = %path.display(), %error, "failed to apply default ownership");
    }
}

#[cfg(not(unix))]
fn apply_ownership(_path: &Path, _owner: Option<u32>, _group: Option<u32>, _is_link: bool) {}

fn io_error(path: &Path, source: std::io::Error) -> TransitionError {
    TransitionError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checksums::HashAlgorithm;

    fn file_entry(byte: u8) -> Entry {
        Entry::File {
            digest: vec![byte],
            executable: false,
        }
    }

    fn stager(root: &Path) -> Stager {
        Stager::new(root.join(".staging"), HashAlgorithm::Sha1).expect("stager")
    }

    #[test]
    fn creates_a_new_file_from_staged_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stager = stager(temp.path());
        let digest = vec![1];
        std::fs::write(stager.staged_path("a.txt", &digest), b"hello").expect("seed staged");

        let change = Change::new("a.txt", None, Some(&file_entry(1)));
        let outcome = apply(
            temp.path(),
            &stager,
            std::slice::from_ref(&change),
            TransitionDefaults::default(),
        );

        assert!(outcome.problems.is_empty());
        assert_eq!(outcome.applied, vec!["a.txt".to_owned()]);
        assert_eq!(
            std::fs::read(temp.path().join("a.txt")).expect("read"),
            b"hello"
        );
    }

    #[test]
    fn reports_missing_staged_content_without_aborting_the_batch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stager = stager(temp.path());

        let missing = Change::new("missing.txt", None, Some(&file_entry(9)));
        let digest = vec![2];
        std::fs::write(stager.staged_path("ok.txt", &digest), b"ok").expect("seed");
        let ok = Change::new("ok.txt", None, Some(&file_entry(2)));

        let outcome = apply(
            temp.path(),
            &stager,
            &[missing, ok],
            TransitionDefaults::default(),
        );

        assert_eq!(outcome.applied, vec!["ok.txt".to_owned()]);
        assert_eq!(outcome.problems.len(), 1);
        assert_eq!(outcome.problems[0].path, "missing.txt");
        assert!(matches!(
            outcome.problems[0].error,
            TransitionError::MissingStagedContent { .. }
        ));
    }

    #[test]
    fn refuses_to_delete_a_path_whose_current_kind_has_diverged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stager = stager(temp.path());

        // The reconciler thought this path was a file, but it is actually
        // now a directory: deletion must not proceed blindly.
        std::fs::create_dir(temp.path().join("surprise")).expect("create dir");
        let change = Change::new("surprise", Some(&file_entry(1)), None);

        let outcome = apply(
            temp.path(),
            &stager,
            std::slice::from_ref(&change),
            TransitionDefaults::default(),
        );

        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.problems.len(), 1);
        assert!(matches!(
            outcome.problems[0].error,
            TransitionError::StaleEntry { .. }
        ));
        assert!(temp.path().join("surprise").is_dir());
    }

    #[test]
    fn creates_and_removes_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stager = stager(temp.path());

        let create = Change::new("sub", None, Some(&Entry::empty_directory()));
        let outcome = apply(
            temp.path(),
            &stager,
            std::slice::from_ref(&create),
            TransitionDefaults::default(),
        );
        assert!(outcome.problems.is_empty());
        assert!(temp.path().join("sub").is_dir());

        let remove = Change::new("sub", Some(&Entry::empty_directory()), None);
        let outcome = apply(
            temp.path(),
            &stager,
            std::slice::from_ref(&remove),
            TransitionDefaults::default(),
        );
        assert!(outcome.problems.is_empty());
        assert!(!temp.path().join("sub").exists());
    }

    #[test]
    fn removes_a_populated_directory_depth_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stager = stager(temp.path());

        let mut nested = BTreeMap::new();
        nested.insert("inner.txt".to_owned(), file_entry(1));
        let mut contents = BTreeMap::new();
        contents.insert("top.txt".to_owned(), file_entry(2));
        contents.insert("nested".to_owned(), Entry::Directory { contents: nested });
        let old = Entry::Directory { contents };

        std::fs::create_dir_all(temp.path().join("sub/nested")).expect("seed dirs");
        std::fs::write(temp.path().join("sub/top.txt"), b"a").expect("seed file");
        std::fs::write(temp.path().join("sub/nested/inner.txt"), b"b").expect("seed nested file");

        let remove = Change::new("sub", Some(&old), None);
        let outcome = apply(
            temp.path(),
            &stager,
            std::slice::from_ref(&remove),
            TransitionDefaults::default(),
        );

        assert!(outcome.problems.is_empty());
        assert_eq!(outcome.applied, vec!["sub".to_owned()]);
        assert!(!temp.path().join("sub").exists());
    }

    #[test]
    fn creates_a_directory_with_nested_files_in_one_transition() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stager = stager(temp.path());

        let top_digest = vec![1];
        let inner_digest = vec![2];
        std::fs::write(stager.staged_path("sub/top.txt", &top_digest), b"top").expect("seed top");
        std::fs::write(stager.staged_path("sub/nested/inner.txt", &inner_digest), b"inner")
            .expect("seed nested");

        let mut nested = BTreeMap::new();
        nested.insert(
            "inner.txt".to_owned(),
            Entry::File {
                digest: inner_digest,
                executable: false,
            },
        );
        let mut contents = BTreeMap::new();
        contents.insert(
            "top.txt".to_owned(),
            Entry::File {
                digest: top_digest,
                executable: false,
            },
        );
        contents.insert("nested".to_owned(), Entry::Directory { contents: nested });
        let new = Entry::Directory { contents };

        let create = Change::new("sub", None, Some(&new));
        let outcome = apply(
            temp.path(),
            &stager,
            std::slice::from_ref(&create),
            TransitionDefaults::default(),
        );

        assert!(outcome.problems.is_empty());
        assert_eq!(
            std::fs::read(temp.path().join("sub/top.txt")).expect("read top"),
            b"top"
        );
        assert_eq!(
            std::fs::read(temp.path().join("sub/nested/inner.txt")).expect("read nested"),
            b"inner"
        );
    }

    #[test]
    fn replaces_a_populated_directory_with_a_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stager = stager(temp.path());

        let mut contents = BTreeMap::new();
        contents.insert("child.txt".to_owned(), file_entry(1));
        let old = Entry::Directory { contents };

        std::fs::create_dir(temp.path().join("sub")).expect("seed dir");
        std::fs::write(temp.path().join("sub/child.txt"), b"child").expect("seed child");

        let digest = vec![9];
        std::fs::write(stager.staged_path("sub", &digest), b"replacement").expect("seed staged");
        let new = Entry::File {
            digest,
            executable: false,
        };

        let replace = Change::new("sub", Some(&old), Some(&new));
        let outcome = apply(
            temp.path(),
            &stager,
            std::slice::from_ref(&replace),
            TransitionDefaults::default(),
        );

        assert!(outcome.problems.is_empty());
        assert_eq!(
            std::fs::read(temp.path().join("sub")).expect("read replacement"),
            b"replacement"
        );
    }

    #[cfg(unix)]
    #[test]
    fn creates_a_symbolic_link() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stager = stager(temp.path());

        let change = Change::new(
            "link",
            None,
            Some(&Entry::SymbolicLink {
                target: "target.txt".to_owned(),
            }),
        );
        let outcome = apply(
            temp.path(),
            &stager,
            std::slice::from_ref(&change),
            TransitionDefaults::default(),
        );
        assert!(outcome.problems.is_empty());
        let link = temp.path().join("link");
        assert!(link.symlink_metadata().expect("metadata").file_type().is_symlink());
        assert_eq!(
            std::fs::read_link(&link).expect("read_link"),
            Path::new("target.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn executable_files_get_the_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let stager = stager(temp.path());
        let digest = vec![3];
        std::fs::write(stager.staged_path("run.sh", &digest), b"#!/bin/sh\n").expect("seed");

        let change = Change::new(
            "run.sh",
            None,
            Some(&Entry::File {
                digest,
                executable: true,
            }),
        );
        apply(
            temp.path(),
            &stager,
            std::slice::from_ref(&change),
            TransitionDefaults::default(),
        );

        let mode = std::fs::metadata(temp.path().join("run.sh"))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
