//! The recursive, sorted-order filesystem walk.

use crate::{ScanError, ScanRequest, Result};
use checksums::HashAlgorithm;
use filters::{IgnoreCache, IgnoreSet};
use model::{Cache, CacheEntry, Entry, ScanMode, SymbolicLinkMode};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) struct Walker<'a> {
    root: &'a Path,
    previous_snapshot: Option<&'a Entry>,
    recheck_paths: Option<&'a HashSet<String>>,
    algorithm: HashAlgorithm,
    old_cache: Cache,
    new_cache: Cache,
    ignores: &'a IgnoreSet,
    ignore_cache: IgnoreCache,
    symlink_mode: SymbolicLinkMode,
    ignore_vcs: bool,
    scan_mode: ScanMode,
    is_cancelled: &'a dyn Fn() -> bool,
}

impl<'a> Walker<'a> {
    pub(crate) fn new(request: &ScanRequest<'a>) -> Self {
        Self {
            root: request.root,
            previous_snapshot: request.previous_snapshot,
            recheck_paths: request.recheck_paths,
            algorithm: request.algorithm,
            old_cache: request.cache.clone(),
            new_cache: Cache::new(),
            ignores: request.ignores,
            ignore_cache: request.ignore_cache.clone(),
            symlink_mode: request.symlink_mode,
            ignore_vcs: matches!(request.ignore_vcs_mode, model::IgnoreVCSMode::Ignore),
            scan_mode: request.scan_mode,
            is_cancelled: request.is_cancelled,
        }
    }

    pub(crate) fn walk_root(&mut self) -> Result<Entry> {
        self.walk_directory("", self.root.to_path_buf())
    }

    pub(crate) fn finish(self) -> (Cache, IgnoreCache) {
        let mut ignore_cache = self.ignore_cache;
        ignore_cache.swap_in();
        (self.new_cache, ignore_cache)
    }

    fn check_cancelled(&self) -> Result<()> {
        if (self.is_cancelled)() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn trusts_previous(&self, relative: &str) -> bool {
        if relative.is_empty() || !matches!(self.scan_mode, ScanMode::Accelerated) {
            return false;
        }
        if self.previous_snapshot.is_none() {
            return false;
        }
        !subtree_needs_recheck(relative, self.recheck_paths)
    }

    fn walk_entry(&mut self, relative: &str, full_path: PathBuf) -> Result<Entry> {
        self.check_cancelled()?;

        if self.trusts_previous(relative) {
            if let Some(previous) = self.previous_snapshot.and_then(|tree| tree.get(relative)) {
                return Ok(previous.clone());
            }
        }

        let metadata = match fs::symlink_metadata(&full_path) {
            Ok(metadata) => metadata,
            Err(err) => return Ok(Entry::Problematic { problem: err.to_string() }),
        };
        let file_type = metadata.file_type();

        if file_type.is_symlink() {
            return Ok(self.handle_symlink(&full_path));
        }
        if file_type.is_dir() {
            return self.walk_directory(relative, full_path);
        }
        if file_type.is_file() {
            return Ok(self.handle_file(relative, &full_path, &metadata));
        }
        Ok(Entry::Untracked)
    }

    fn walk_directory(&mut self, relative: &str, full_path: PathBuf) -> Result<Entry> {
        self.check_cancelled()?;

        let read_dir = match fs::read_dir(&full_path) {
            Ok(read_dir) => read_dir,
            Err(err) if !relative.is_empty() => {
                return Ok(Entry::Problematic { problem: err.to_string() });
            }
            Err(err) => {
                return Err(ScanError::Io {
                    path: full_path.display().to_string(),
                    source: err,
                })
            }
        };

        let mut names: Vec<String> = Vec::new();
        for entry in read_dir {
            match entry {
                Ok(entry) => match entry.file_name().into_string() {
                    Ok(name) => names.push(name),
                    Err(_) => continue,
                },
                Err(_) => continue,
            }
        }
        names.sort();

        let mut contents = BTreeMap::new();
        for name in names {
            let child_relative = if relative.is_empty() {
                name.clone()
            } else {
                format!("{relative}/{name}")
            };
            let child_path = full_path.join(&name);

            if self.ignore_vcs && filters::is_vcs_directory_name(&name) {
                continue;
            }

            let is_dir = fs::symlink_metadata(&child_path)
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if self.ignore_cache.evaluate(self.ignores, &child_relative, is_dir) {
                continue;
            }

            if matches!(self.symlink_mode, SymbolicLinkMode::Ignore) {
                let is_symlink = fs::symlink_metadata(&child_path)
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false);
                if is_symlink {
                    continue;
                }
            }

            let child_entry = self.walk_entry(&child_relative, child_path)?;
            contents.insert(name, child_entry);
        }
        Ok(Entry::Directory { contents })
    }

    fn handle_symlink(&self, full_path: &Path) -> Entry {
        let target = match fs::read_link(full_path) {
            Ok(target) => target,
            Err(err) => return Entry::Problematic { problem: err.to_string() },
        };
        let Some(target) = target.to_str() else {
            return Entry::Problematic {
                problem: "symbolic link target is not valid UTF-8".to_owned(),
            };
        };

        match self.symlink_mode {
            SymbolicLinkMode::Ignore => {
                // Handled by the caller before walk_entry is reached; if we
                // get here the link slipped through (e.g. direct root
                // scan of a symlink), so treat it as untracked.
                Entry::Untracked
            }
            SymbolicLinkMode::Portable => {
                match model::validate_portable_symlink_target(target) {
                    Ok(()) => Entry::SymbolicLink { target: target.to_owned() },
                    Err(err) => Entry::Problematic { problem: err.to_string() },
                }
            }
            SymbolicLinkMode::PosixRaw => Entry::SymbolicLink { target: target.to_owned() },
        }
    }

    fn handle_file(&mut self, relative: &str, full_path: &Path, metadata: &fs::Metadata) -> Entry {
        let observed = observe(metadata);
        let not_rechecked = self
            .recheck_paths
            .map(|paths| !paths.contains(relative))
            .unwrap_or(true);

        if not_rechecked {
            if let Some((digest, executable)) = self.old_cache.lookup(relative, observed) {
                let digest = digest.to_vec();
                self.new_cache.insert(relative.to_owned(), observed, digest.clone(), executable);
                return Entry::File { digest, executable };
            }
        }

        let content = match fs::read(full_path) {
            Ok(content) => content,
            Err(err) => return Entry::Problematic { problem: err.to_string() },
        };
        let mut hasher = self.algorithm.hasher();
        hasher.update(&content);
        let digest = hasher.finalize();
        let executable = is_executable(metadata);

        self.new_cache.insert(relative.to_owned(), observed, digest.clone(), executable);
        Entry::File { digest, executable }
    }
}

fn observe(metadata: &fs::Metadata) -> CacheEntry {
    let mtime = filetime::FileTime::from_last_modification_time(metadata);
    CacheEntry {
        size: metadata.len(),
        modification_time: (mtime.seconds(), mtime.nanoseconds()),
        mode: file_mode(metadata),
    }
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

/// Whether `relative` (or anything under it) must be fully re-examined
/// rather than trusted wholesale from the previous snapshot: either no
/// recheck set was supplied (forcing full treatment everywhere) or the set
/// names this path or a descendant of it.
fn subtree_needs_recheck(relative: &str, recheck_paths: Option<&HashSet<String>>) -> bool {
    let Some(paths) = recheck_paths else {
        return true;
    };
    let prefix = format!("{relative}/");
    paths.iter().any(|path| path == relative || path.starts_with(&prefix))
}
