//! Filesystem capability probes: executable-bit preservation and Unicode
//! filename decomposition.

use model::ProbeMode;
use std::fs;
use std::path::Path;

/// The capability probe results for a synchronization root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether setting the executable bit on a file in this root survives
    /// a round trip through the filesystem.
    pub preserves_executability: bool,
    /// Whether the filesystem normalizes filenames to decomposed
    /// (NFD-style) Unicode form, as HFS+ does.
    pub decomposes_unicode: bool,
}

/// Conservative defaults used when `probe_mode` is [`ProbeMode::Assume`]:
/// most filesystems this engine targets preserve the executable bit, and
/// most (excluding HFS+) do not decompose Unicode filenames.
const ASSUMED: Capabilities = Capabilities {
    preserves_executability: true,
    decomposes_unicode: false,
};

/// Probes `root`'s capabilities, or returns [`ASSUMED`] defaults without
/// touching the filesystem when `probe_mode` is [`ProbeMode::Assume`].
#[must_use]
pub fn probe(root: &Path, probe_mode: ProbeMode) -> Capabilities {
    match probe_mode {
        ProbeMode::Assume => ASSUMED,
        ProbeMode::Probe => Capabilities {
            preserves_executability: probe_executability(root).unwrap_or(ASSUMED.preserves_executability),
            decomposes_unicode: probe_unicode_decomposition(root).unwrap_or(ASSUMED.decomposes_unicode),
        },
    }
}

#[cfg(unix)]
fn probe_executability(root: &Path) -> Option<bool> {
    use std::os::unix::fs::PermissionsExt;

    let probe_path = probe_file_path(root, "probe-executable");
    fs::write(&probe_path, b"probe").ok()?;
    let mut permissions = fs::metadata(&probe_path).ok()?.permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&probe_path, permissions).ok()?;
    let observed_mode = fs::metadata(&probe_path).ok()?.permissions().mode();
    let _ = fs::remove_file(&probe_path);
    Some(observed_mode & 0o111 != 0)
}

#[cfg(not(unix))]
fn probe_executability(_root: &Path) -> Option<bool> {
    None
}

fn probe_unicode_decomposition(root: &Path) -> Option<bool> {
    // "\u{e9}" is the precomposed form of e-acute (NFC); HFS+-style
    // filesystems rewrite it to "e\u{301}" (NFD) on creation.
    let precomposed = "probe-e\u{e9}";
    let probe_path = root.join(precomposed);
    fs::write(&probe_path, b"probe").ok()?;

    let mut observed_decomposed = false;
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with("probe-e") && name != precomposed {
                    observed_decomposed = true;
                    break;
                }
            }
        }
    }
    let _ = fs::remove_file(&probe_path);
    Some(observed_decomposed)
}

fn probe_file_path(root: &Path, stem: &str) -> std::path::PathBuf {
    root.join(format!(".{stem}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn assume_mode_never_touches_the_filesystem() {
        let dir = tempdir().unwrap();
        let capabilities = probe(dir.path(), ProbeMode::Assume);
        assert_eq!(capabilities, ASSUMED);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn probe_mode_detects_executable_preservation_on_typical_filesystems() {
        let dir = tempdir().unwrap();
        let capabilities = probe(dir.path(), ProbeMode::Probe);
        assert!(capabilities.preserves_executability);
    }

    #[test]
    fn probe_mode_cleans_up_its_scratch_files() {
        let dir = tempdir().unwrap();
        let _ = probe(dir.path(), ProbeMode::Probe);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
