//! The staging directory: a content-addressed store that holds file
//! content received from the opposite endpoint until the transitioner
//! moves it into place.

use checksums::HashAlgorithm;
use rsync::{Frame, Signature};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while staging content.
#[derive(Debug, Error)]
pub enum StageError {
    /// An I/O operation against the staging directory or a base file
    /// failed.
    #[error("I/O error staging {path:?}: {source}")]
    Io {
        /// The path being staged.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The received transmission could not be replayed against its base.
    #[error(transparent)]
    Rsync(#[from] rsync::RsyncError),
}

fn io_error(path: &str, source: std::io::Error) -> StageError {
    StageError::Io {
        path: path.to_owned(),
        source,
    }
}

/// One path the controller wants staged, with the digest it expects the
/// staged content to have once complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    /// Path relative to the synchronization root.
    pub path: String,
    /// The digest the target endpoint's tree records for this path.
    pub digest: Vec<u8>,
}

/// The endpoint's response to a batch of [`StageRequest`]s. Wire-compatible
/// as-is, so the remote endpoint's `Stage` RPC response carries this type
/// directly.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StageResponse {
    /// Paths for which content must actually be transmitted; paths already
    /// staged with the requested digest are omitted.
    pub paths_needed: Vec<String>,
    /// Base signature for each path in `paths_needed`, computed from that
    /// path's current content on this endpoint's live tree (the zero-value
    /// signature if no such file exists).
    pub signatures: HashMap<String, Signature>,
}

/// A content-addressed staging directory for one session.
pub struct Stager {
    directory: PathBuf,
    algorithm: HashAlgorithm,
}

impl Stager {
    /// Opens (creating if necessary) a staging directory that digests
    /// content using `algorithm`.
    pub fn new(directory: impl Into<PathBuf>, algorithm: HashAlgorithm) -> std::io::Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            algorithm,
        })
    }

    /// The staging directory's root path.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The path at which `path`'s content, once staged with `digest`,
    /// lives.
    #[must_use]
    pub fn staged_path(&self, path: &str, digest: &[u8]) -> PathBuf {
        self.directory.join(staged_filename(path, digest))
    }

    /// Whether `path` is already staged with exactly `digest`, making a
    /// repeat stage request for it a no-op.
    #[must_use]
    pub fn is_staged(&self, path: &str, digest: &[u8]) -> bool {
        self.staged_path(path, digest).is_file()
    }

    /// Classifies `requests` into those already satisfied and those still
    /// needing content, computing a transfer base signature for the latter
    /// from each path's current content under `root` (the live destination
    /// tree, not the staging directory).
    pub fn prepare(
        &self,
        root: &Path,
        requests: &[StageRequest],
    ) -> std::io::Result<StageResponse> {
        let mut response = StageResponse::default();
        for request in requests {
            if self.is_staged(&request.path, &request.digest) {
                continue;
            }
            let signature = match std::fs::read(root.join(&request.path)) {
                Ok(bytes) => {
                    let block_size = rsync::signature::recommended_block_size(bytes.len() as u64);
                    Signature::compute(&bytes, block_size, self.algorithm)
                }
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                    Signature::empty(self.algorithm)
                }
                Err(error) => return Err(error),
            };
            response.signatures.insert(request.path.clone(), signature);
            response.paths_needed.push(request.path.clone());
        }
        Ok(response)
    }

    /// Replays a fully-received per-file frame stream against `base` and
    /// `signature`, writing the reconstructed content into the staging
    /// directory under `path`/`digest`'s content-addressed name.
    ///
    /// A no-op if `path` is already staged with `digest`. Burns the whole
    /// stream on a remote-reported error or a frame received after the
    /// stream's `Done` frame, writing nothing.
    pub fn receive(
        &self,
        path: &str,
        digest: &[u8],
        base: &[u8],
        signature: &Signature,
        frames: &[Frame],
    ) -> Result<(), StageError> {
        if self.is_staged(path, digest) {
            return Ok(());
        }

        let mut operations = Vec::new();
        let mut remote_error = None;
        let mut done = false;
        for frame in frames {
            if done {
                return Err(StageError::Rsync(rsync::RsyncError::FrameAfterDone));
            }
            match frame {
                Frame::Operation(operation) => operations.push(operation.clone()),
                Frame::Error(message) => {
                    remote_error = Some(message.clone());
                    done = true;
                }
                Frame::Done => done = true,
            }
        }
        if let Some(message) = remote_error {
            return Err(StageError::Rsync(rsync::RsyncError::RemoteError(message)));
        }

        let contents = rsync::delta::patch(base, signature, &operations)?;
        let destination = self.staged_path(path, digest);
        write_atomically(&destination, &contents).map_err(|source| io_error(path, source))?;
        tracing::debug!(path, bytes = contents.len(), "staged content");
        Ok(())
    }

    /// Reads back previously staged content, for callers that need the
    /// bytes rather than just the file's final location (e.g. the local
    /// endpoint transferring staged content across a process boundary).
    pub fn read_staged(&self, path: &str, digest: &[u8]) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.staged_path(path, digest))
    }

    /// Removes one staged file, if present. Used to reclaim space once a
    /// transition has consumed it or superseded it with a newer digest.
    pub fn remove_staged(&self, path: &str, digest: &[u8]) -> std::io::Result<()> {
        match std::fs::remove_file(self.staged_path(path, digest)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        }
    }
}

fn staged_filename(path: &str, digest: &[u8]) -> String {
    // Two different paths can legitimately produce identical content
    // (hence identical `digest`), so the staged name folds in a hash of
    // the path as well to keep their staged copies independent until each
    // is individually transitioned.
    let mut path_hasher = HashAlgorithm::Xxh3_128.hasher();
    path_hasher.update(path.as_bytes());
    let path_hash = path_hasher.finalize();
    format!("{}-{}", hex(&path_hash), hex(digest))
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn write_atomically(destination: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.persist(destination).map_err(|error| error.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use checksums::HashAlgorithm;
    use rsync::Operation;

    fn stager() -> (tempfile::TempDir, Stager) {
        let dir = tempfile::tempdir().expect("tempdir");
        let stager = Stager::new(dir.path().join("staging"), HashAlgorithm::Sha1).expect("new");
        (dir, stager)
    }

    fn digest(bytes: &[u8]) -> Vec<u8> {
        let mut hasher = HashAlgorithm::Sha1.hasher();
        hasher.update(bytes);
        hasher.finalize()
    }

    #[test]
    fn staged_filenames_differ_for_the_same_content_at_different_paths() {
        let (_root, stager) = stager();
        let d = digest(b"identical content");
        assert_ne!(
            stager.staged_path("a.txt", &d),
            stager.staged_path("b.txt", &d)
        );
    }

    #[test]
    fn prepare_requests_full_transfer_when_no_base_exists() {
        let (root, stager) = stager();
        let requests = vec![StageRequest {
            path: "new.txt".to_owned(),
            digest: digest(b"new content"),
        }];
        let response = stager.prepare(root.path(), &requests).expect("prepare");
        assert_eq!(response.paths_needed, vec!["new.txt".to_owned()]);
        assert!(response.signatures["new.txt"].is_empty());
    }

    #[test]
    fn prepare_skips_requests_already_staged_with_the_target_digest() {
        let (root, stager) = stager();
        let d = digest(b"already here");
        let staged_path = stager.staged_path("file.txt", &d);
        std::fs::write(&staged_path, b"already here").expect("seed staged file");

        let requests = vec![StageRequest {
            path: "file.txt".to_owned(),
            digest: d,
        }];
        let response = stager.prepare(root.path(), &requests).expect("prepare");
        assert!(response.paths_needed.is_empty());
    }

    #[test]
    fn receive_reconstructs_and_stages_content() {
        let (_root, stager) = stager();
        let base = b"the quick brown fox";
        let target = b"the slow brown fox";
        let signature = Signature::compute(base, 4, HashAlgorithm::Sha1);
        let operations = rsync::deltify(target, &signature);
        let frames: Vec<Frame> = operations
            .into_iter()
            .map(Frame::Operation)
            .chain(std::iter::once(Frame::Done))
            .collect();

        let d = digest(target);
        stager
            .receive("file.txt", &d, base, &signature, &frames)
            .expect("receive");

        assert!(stager.is_staged("file.txt", &d));
        assert_eq!(stager.read_staged("file.txt", &d).expect("read"), target);
    }

    #[test]
    fn receive_is_idempotent_when_already_staged() {
        let (_root, stager) = stager();
        let d = digest(b"payload");
        let staged_path = stager.staged_path("file.txt", &d);
        std::fs::write(&staged_path, b"payload").expect("seed");

        // A bogus frame stream would fail to patch; since the content is
        // already staged this must short-circuit before touching it.
        let bogus_signature = Signature::empty(HashAlgorithm::Sha1);
        let bogus_frames = vec![Frame::Operation(Operation::Block(0)), Frame::Done];
        stager
            .receive("file.txt", &d, b"", &bogus_signature, &bogus_frames)
            .expect("short-circuit");
        assert_eq!(stager.read_staged("file.txt", &d).expect("read"), b"payload");
    }

    #[test]
    fn receive_reports_a_remote_error_without_staging_anything() {
        let (_root, stager) = stager();
        let d = digest(b"unused");
        let signature = Signature::empty(HashAlgorithm::Sha1);
        let frames = vec![Frame::Error("source read failed".to_owned()), Frame::Done];

        let result = stager.receive("file.txt", &d, b"", &signature, &frames);
        assert!(matches!(
            result,
            Err(StageError::Rsync(rsync::RsyncError::RemoteError(_)))
        ));
        assert!(!stager.is_staged("file.txt", &d));
    }

    #[test]
    fn remove_staged_succeeds_if_already_absent() {
        let (_root, stager) = stager();
        let d = digest(b"never staged");
        assert!(stager.remove_staged("file.txt", &d).is_ok());
    }
}
