//! The states a session controller cycles through, and the observable
//! status a caller (ultimately the manager, then a CLI) can read at any
//! time.

use reconcile::Conflict;
use serde::{Deserialize, Serialize};

/// One state in a session controller's `Disconnected → Connecting →
/// Scanning → Reconciling → Staging* → Transitioning* → Saving →
/// Watching` cycle, plus the two steady states `Paused` and `Halted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    /// Endpoints are not connected; waiting to (re)connect, possibly after
    /// a backoff delay.
    Disconnected,
    /// Endpoints are being (re)connected.
    Connecting,
    /// Both endpoints are being scanned in parallel.
    Scanning,
    /// The ancestor and the two fresh snapshots are being reconciled.
    Reconciling,
    /// Alpha is receiving staged content for this cycle's changes.
    StagingAlpha,
    /// Beta is receiving staged content for this cycle's changes.
    StagingBeta,
    /// Alpha is applying this cycle's changes.
    TransitioningAlpha,
    /// Beta is applying this cycle's changes.
    TransitioningBeta,
    /// The advanced ancestor is being persisted.
    Saving,
    /// The cycle is idle, waiting for a watch event or the poll interval
    /// to elapse on either endpoint.
    Watching,
    /// The session is paused; no cycle runs until resumed.
    Paused,
    /// The session has been terminated. Its endpoints have been shut down
    /// and the controller will not run again.
    Halted,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::Disconnected
    }
}

/// One path that failed to transition, with a human-readable reason.
/// Controller-facing counterpart of [`endpoint::TransitionProblem`],
/// serializable for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionProblem {
    /// The path whose change failed.
    pub path: String,
    /// Why it failed.
    pub reason: String,
}

impl From<endpoint::TransitionProblem> for TransitionProblem {
    fn from(problem: endpoint::TransitionProblem) -> Self {
        Self {
            path: problem.path,
            reason: problem.reason,
        }
    }
}

/// Everything about a session's live status that is observable from
/// outside the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// The controller's current state.
    pub controller_state: ControllerState,
    /// The most recent fatal error, if the session has entered a terminal
    /// error state. Cleared on recovery; protocol violations and version
    /// mismatches never recover, so this stays set until termination.
    pub last_error: Option<String>,
    /// Conflicts surfaced by the most recently completed reconciliation.
    pub conflicts: Vec<Conflict>,
    /// Count of `Problematic` entries observed in alpha's most recent
    /// scan.
    pub alpha_scan_problems: u64,
    /// Count of `Problematic` entries observed in beta's most recent scan.
    pub beta_scan_problems: u64,
    /// Paths whose transition failed on alpha in the most recently
    /// completed cycle.
    pub alpha_transition_problems: Vec<TransitionProblem>,
    /// Paths whose transition failed on beta in the most recently
    /// completed cycle.
    pub beta_transition_problems: Vec<TransitionProblem>,
    /// Number of cycles completed without a fatal error since the
    /// controller was constructed.
    pub successful_cycles: u64,
}

impl SessionState {
    pub(crate) fn set(&mut self, state: ControllerState) {
        self.controller_state = state;
    }
}
