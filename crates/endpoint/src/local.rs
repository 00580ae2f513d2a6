//! The direct, in-process endpoint: scans, stages, and transitions a
//! filesystem root without any wire protocol in the loop.

use crate::{EndpointError, Result, ScanReport, SupplyFrame, TransitionReport};
use async_trait::async_trait;
use checksums::HashAlgorithm;
use filters::{IgnoreCache, IgnoreSet};
use model::{Cache, Entry, IgnoreVCSMode, ProbeMode, ScanMode, SymbolicLinkMode};
use reconcile::Change;
use rsync::{Frame, Signature};
use stage::{StageRequest, StageResponse, Stager, TransitionDefaults};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Every option a [`LocalEndpoint`] needs that is not implied by its root
/// path: the resolved subset of a session's [`stage::TransitionDefaults`]
/// plus the scanner's tuning knobs. Session-level layering (global,
/// session, and endpoint overrides) happens one layer up, in the
/// controller; this struct holds only the already-resolved values.
#[derive(Debug, Clone)]
pub struct LocalEndpointConfig {
    /// Digest algorithm for file content and rsync block signatures.
    pub algorithm: HashAlgorithm,
    /// Ordered ignore rules.
    pub ignores: IgnoreSet,
    /// Whether conventional VCS directories are skipped.
    pub ignore_vcs_mode: IgnoreVCSMode,
    /// How symbolic links are scanned and represented.
    pub symlink_mode: SymbolicLinkMode,
    /// Whether to probe filesystem capabilities or assume defaults.
    pub probe_mode: ProbeMode,
    /// Full vs. accelerated scanning.
    pub scan_mode: ScanMode,
    /// Cap on total entry count; 0 means unlimited.
    pub maximum_entry_count: u64,
    /// How long [`LocalEndpoint::poll`] waits for a watch event before
    /// returning anyway.
    pub watch_polling_interval: Duration,
    /// Modes and ownership applied to newly created entries.
    pub transition_defaults: TransitionDefaults,
}

struct LocalState {
    cache: Cache,
    ignore_cache: IgnoreCache,
    previous_snapshot: Option<Entry>,
    pending_rechecks: HashSet<String>,
}

/// The local endpoint: backed directly by the scanner, stager, and
/// transitioner against `root`. Owns the on-disk cache (held in memory
/// here; the manager is responsible for persisting and reloading it
/// between controller restarts), the staging directory, and — if given
/// one — a channel of watcher events.
///
/// Platform filesystem watching is an external collaborator: this type
/// only consumes a stream of changed paths handed to it at construction,
/// it never opens a watch itself.
pub struct LocalEndpoint {
    root: PathBuf,
    config: LocalEndpointConfig,
    stager: Stager,
    state: Mutex<LocalState>,
    watch_events: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl LocalEndpoint {
    /// Opens a local endpoint rooted at `root`, staging content under
    /// `staging_directory`, optionally fed watch events via
    /// `watch_events`. `cache`/`ignore_cache`/`previous_snapshot` seed the
    /// endpoint's acceleration state, normally reloaded from the
    /// manager's persisted per-session cache file.
    pub fn new(
        root: impl Into<PathBuf>,
        staging_directory: impl Into<PathBuf>,
        config: LocalEndpointConfig,
        cache: Cache,
        previous_snapshot: Option<Entry>,
        watch_events: Option<mpsc::UnboundedReceiver<String>>,
    ) -> std::io::Result<Self> {
        let stager = Stager::new(staging_directory, config.algorithm)?;
        Ok(Self {
            root: root.into(),
            config,
            stager,
            state: Mutex::new(LocalState {
                cache,
                ignore_cache: IgnoreCache::default(),
                previous_snapshot,
                pending_rechecks: HashSet::new(),
            }),
            watch_events: Mutex::new(watch_events),
        })
    }

    /// The current in-memory cache, for the manager to persist after a
    /// scan.
    pub async fn cache_snapshot(&self) -> Cache {
        self.state.lock().await.cache.clone()
    }

    /// The staging directory this endpoint stages content into.
    #[must_use]
    pub fn staging_directory(&self) -> &std::path::Path {
        self.stager.directory()
    }
}

#[async_trait]
impl super::Endpoint for LocalEndpoint {
    async fn poll(&self, cancellation: &CancellationToken) -> Result<()> {
        let mut watch_events = self.watch_events.lock().await;
        let sleep = tokio::time::sleep(self.config.watch_polling_interval);
        tokio::pin!(sleep);
        match watch_events.as_mut() {
            Some(events) => {
                tokio::select! {
                    () = cancellation.cancelled() => return Err(EndpointError::Cancelled),
                    () = &mut sleep => {}
                    received = events.recv() => {
                        if let Some(path) = received {
                            let mut state = self.state.lock().await;
                            state.pending_rechecks.insert(path);
                            while let Ok(path) = events.try_recv() {
                                state.pending_rechecks.insert(path);
                            }
                        }
                    }
                }
            }
            None => {
                tokio::select! {
                    () = cancellation.cancelled() => return Err(EndpointError::Cancelled),
                    () = &mut sleep => {}
                }
            }
        }
        Ok(())
    }

    async fn scan(&self, baseline: Option<Entry>, cancellation: &CancellationToken) -> Result<ScanReport> {
        if cancellation.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }

        let root = self.root.clone();
        let config = self.config.clone();

        let mut state = self.state.lock().await;
        let cache = state.cache.clone();
        let ignore_cache = state.ignore_cache.clone();
        let previous_snapshot = baseline.or_else(|| state.previous_snapshot.clone());
        let recheck_paths = std::mem::take(&mut state.pending_rechecks);
        drop(state);

        let recheck_for_request = matches!(config.scan_mode, ScanMode::Accelerated).then_some(recheck_paths);
        let cancellation = cancellation.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let is_cancelled = || cancellation.is_cancelled();
            scan::scan(scan::ScanRequest {
                root: &root,
                previous_snapshot: previous_snapshot.as_ref(),
                recheck_paths: recheck_for_request.as_ref(),
                algorithm: config.algorithm,
                cache,
                ignores: &config.ignores,
                ignore_cache,
                probe_mode: config.probe_mode,
                symlink_mode: config.symlink_mode,
                ignore_vcs_mode: config.ignore_vcs_mode,
                scan_mode: config.scan_mode,
                maximum_entry_count: config.maximum_entry_count,
                is_cancelled: &is_cancelled,
            })
        })
        .await
        .expect("scan task panicked")?;

        let mut state = self.state.lock().await;
        state.cache = outcome.cache;
        state.ignore_cache = outcome.ignore_cache;
        state.previous_snapshot = Some(outcome.snapshot.clone());

        Ok(ScanReport {
            snapshot: outcome.snapshot,
            preserves_executability: outcome.preserves_executability,
            decomposes_unicode: outcome.decomposes_unicode,
        })
    }

    async fn stage(
        &self,
        requests: Vec<StageRequest>,
        cancellation: &CancellationToken,
    ) -> Result<StageResponse> {
        if cancellation.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }
        let root = self.root.clone();
        Ok(self.stager.prepare(&root, &requests)?)
    }

    async fn supply(
        &self,
        paths: Vec<String>,
        signatures: HashMap<String, Signature>,
        sink: mpsc::UnboundedSender<SupplyFrame>,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        for path in paths {
            if cancellation.is_cancelled() {
                return Err(EndpointError::Cancelled);
            }
            let signature = signatures
                .get(&path)
                .cloned()
                .unwrap_or_else(|| Signature::empty(self.config.algorithm));
            let file_path = self.root.join(&path);

            match tokio::fs::read(&file_path).await {
                Ok(content) => {
                    let operations =
                        tokio::task::spawn_blocking(move || rsync::deltify(&content, &signature))
                            .await
                            .expect("deltify task panicked");
                    for operation in operations {
                        if sink
                            .send(SupplyFrame {
                                path: path.clone(),
                                frame: Frame::Operation(operation),
                            })
                            .is_err()
                        {
                            return Ok(());
                        }
                    }
                    let _ = sink.send(SupplyFrame {
                        path: path.clone(),
                        frame: Frame::Done,
                    });
                }
                Err(error) => {
                    tracing::warn!(path, %error, "supply source read failed");
                    let _ = sink.send(SupplyFrame {
                        path: path.clone(),
                        frame: Frame::Error(error.to_string()),
                    });
                    let _ = sink.send(SupplyFrame {
                        path,
                        frame: Frame::Done,
                    });
                }
            }
        }
        Ok(())
    }

    async fn receive(
        &self,
        path: String,
        digest: Vec<u8>,
        signature: Signature,
        frames: Vec<Frame>,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        if cancellation.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }
        let base = match tokio::fs::read(self.root.join(&path)).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(EndpointError::Io(error)),
        };
        self.stager.receive(&path, &digest, &base, &signature, &frames)?;
        Ok(())
    }

    async fn transition(&self, changes: Vec<Change>, cancellation: &CancellationToken) -> Result<TransitionReport> {
        if cancellation.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }
        let outcome = stage::apply(&self.root, &self.stager, &changes, self.config.transition_defaults);
        for path in &outcome.applied {
            for change in &changes {
                if &change.path == path {
                    if let Some(Entry::File { digest, .. }) = &change.new {
                        let _ = self.stager.remove_staged(path, digest);
                    }
                }
            }
        }
        Ok(TransitionReport {
            applied: outcome.applied,
            problems: outcome
                .problems
                .into_iter()
                .map(|problem| crate::TransitionProblem {
                    path: problem.path,
                    reason: problem.error.to_string(),
                })
                .collect(),
        })
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Endpoint;

    fn config() -> LocalEndpointConfig {
        LocalEndpointConfig {
            algorithm: HashAlgorithm::Sha1,
            ignores: IgnoreSet::default(),
            ignore_vcs_mode: IgnoreVCSMode::Ignore,
            symlink_mode: SymbolicLinkMode::Portable,
            probe_mode: ProbeMode::Assume,
            scan_mode: ScanMode::Full,
            maximum_entry_count: 0,
            watch_polling_interval: Duration::from_millis(10),
            transition_defaults: TransitionDefaults::default(),
        }
    }

    #[tokio::test]
    async fn scan_observes_files_written_to_the_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.txt"), b"hello").expect("seed file");
        let endpoint = LocalEndpoint::new(
            temp.path(),
            temp.path().join(".staging"),
            config(),
            Cache::new(),
            None,
            None,
        )
        .expect("new endpoint");

        let token = CancellationToken::new();
        let report = endpoint.scan(None, &token).await.expect("scan");
        assert!(report.snapshot.get("a.txt").is_some());
    }

    #[tokio::test]
    async fn poll_returns_once_the_interval_elapses_without_a_watcher() {
        let temp = tempfile::tempdir().expect("tempdir");
        let endpoint = LocalEndpoint::new(
            temp.path(),
            temp.path().join(".staging"),
            config(),
            Cache::new(),
            None,
            None,
        )
        .expect("new endpoint");
        let token = CancellationToken::new();
        endpoint.poll(&token).await.expect("poll completes");
    }

    #[tokio::test]
    async fn poll_is_interrupted_by_cancellation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut long_config = config();
        long_config.watch_polling_interval = Duration::from_secs(3600);
        let endpoint = LocalEndpoint::new(
            temp.path(),
            temp.path().join(".staging"),
            long_config,
            Cache::new(),
            None,
            None,
        )
        .expect("new endpoint");
        let token = CancellationToken::new();
        token.cancel();
        let result = endpoint.poll(&token).await;
        assert!(matches!(result, Err(EndpointError::Cancelled)));
    }

    #[tokio::test]
    async fn supply_streams_a_full_file_as_literal_data_with_no_base_signature() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.txt"), b"hello world").expect("seed file");
        let endpoint = LocalEndpoint::new(
            temp.path(),
            temp.path().join(".staging"),
            config(),
            Cache::new(),
            None,
            None,
        )
        .expect("new endpoint");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        endpoint
            .supply(vec!["a.txt".to_owned()], HashMap::new(), tx, &token)
            .await
            .expect("supply");

        let mut saw_done = false;
        while let Some(frame) = rx.recv().await {
            if matches!(frame.frame, Frame::Done) {
                saw_done = true;
                break;
            }
        }
        assert!(saw_done);
    }

    #[tokio::test]
    async fn receive_stages_a_file_reconstructed_from_literal_data() {
        let temp = tempfile::tempdir().expect("tempdir");
        let endpoint = LocalEndpoint::new(
            temp.path(),
            temp.path().join(".staging"),
            config(),
            Cache::new(),
            None,
            None,
        )
        .expect("new endpoint");

        let content = b"hello world".to_vec();
        let mut hasher = config().algorithm.hasher();
        hasher.update(&content);
        let digest = hasher.finalize();
        let frames = vec![
            Frame::Operation(rsync::Operation::Data(content.clone())),
            Frame::Done,
        ];
        let token = CancellationToken::new();
        endpoint
            .receive(
                "new.txt".to_owned(),
                digest.clone(),
                Signature::empty(config().algorithm),
                frames,
                &token,
            )
            .await
            .expect("receive");

        assert_eq!(
            endpoint.stager.read_staged("new.txt", &digest).expect("read staged"),
            content
        );
    }

    #[tokio::test]
    async fn transition_applies_changes_and_frees_their_staged_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let endpoint = LocalEndpoint::new(
            temp.path(),
            temp.path().join(".staging"),
            config(),
            Cache::new(),
            None,
            None,
        )
        .expect("new endpoint");

        let digest = vec![1, 2, 3];
        std::fs::write(endpoint.stager.staged_path("new.txt", &digest), b"content")
            .expect("seed staged content");
        let change = Change::new(
            "new.txt",
            None,
            Some(&Entry::File {
                digest: digest.clone(),
                executable: false,
            }),
        );

        let token = CancellationToken::new();
        let report = endpoint
            .transition(vec![change], &token)
            .await
            .expect("transition");
        assert_eq!(report.applied, vec!["new.txt".to_owned()]);
        assert!(report.problems.is_empty());
        assert!(!endpoint.stager.staged_path("new.txt", &digest).is_file());
        assert_eq!(
            std::fs::read(temp.path().join("new.txt")).expect("read applied file"),
            b"content"
        );
    }
}
