//! The per-session controller: the task that repeatedly drives one
//! session's scan → reconcile → stage → transition cycle against its two
//! endpoints, reporting live [`SessionState`] and accepting lifecycle
//! commands from a [`ControllerHandle`].

use crate::backoff::Backoff;
use crate::cycle::{self, ErrorClass};
use crate::sink::AncestorSink;
use crate::state::{ControllerState, SessionState};
use endpoint::Endpoint;
use model::Entry;
use session::ResolvedConfiguration;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// A lifecycle command sent to a running controller task.
enum Command {
    Pause,
    Resume,
    Reset,
    Flush(oneshot::Sender<()>),
    Terminate(oneshot::Sender<()>),
}

/// A handle to a spawned controller task: the only way anything outside
/// this crate observes or drives a session's lifecycle.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl ControllerHandle {
    /// The controller's current observable status.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every subsequent state change, independent
    /// of [`ControllerHandle::state`]'s point-in-time snapshot.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Requests that the controller pause at its next safe point (the top
    /// of a cycle, or immediately if already idle in `Watching`). Returns
    /// immediately; the transition to [`ControllerState::Paused`] is
    /// observable via [`ControllerHandle::watch_state`].
    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    /// Requests that a paused controller resume its cycle.
    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    /// Discards the controller's ancestor, forcing the next cycle to
    /// reconcile as if the two endpoints had never agreed on anything
    /// (short of an outright conflict where both sides already hold
    /// identical content).
    pub fn reset(&self) {
        let _ = self.commands.send(Command::Reset);
    }

    /// Forces an immediate cycle regardless of the watch/poll interval,
    /// resolving once that cycle's `Saving` phase completes (or
    /// immediately, if the controller has already halted).
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Shuts down both endpoints and halts the controller permanently.
    /// Resolves once the controller has finished shutting down.
    pub async fn terminate(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Terminate(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

/// A session controller. [`Controller::spawn`] is the only constructor;
/// the returned [`ControllerHandle`] is the live handle and the
/// [`tokio::task::JoinHandle`] resolves once the controller reaches
/// [`ControllerState::Halted`].
pub struct Controller;

impl Controller {
    /// Spawns a controller task driving `alpha`/`beta` for `session_id`,
    /// starting from `initial_ancestor` and `config`, persisting ancestor
    /// advances through `ancestor_sink`. `start_paused` mirrors the
    /// session descriptor's `paused` flag, so a resurrected session
    /// resumes in whatever lifecycle state it was left in.
    pub fn spawn(
        session_id: String,
        alpha: Arc<dyn Endpoint>,
        beta: Arc<dyn Endpoint>,
        initial_ancestor: Entry,
        config: ResolvedConfiguration,
        start_paused: bool,
        ancestor_sink: Arc<dyn AncestorSink>,
    ) -> (ControllerHandle, tokio::task::JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let handle = ControllerHandle {
            commands: commands_tx,
            state: state_rx,
        };
        let join = tokio::spawn(run(
            session_id,
            alpha,
            beta,
            initial_ancestor,
            config,
            start_paused,
            ancestor_sink,
            commands_rx,
            state_tx,
        ));
        (handle, join)
    }
}

/// Applies one command, returning `true` if the controller should halt.
async fn handle_command(
    command: Command,
    paused: &mut bool,
    ancestor: &mut Entry,
    pending_flush_acks: &mut Vec<oneshot::Sender<()>>,
    cancellation: &CancellationToken,
    alpha: &Arc<dyn Endpoint>,
    beta: &Arc<dyn Endpoint>,
    state_tx: &watch::Sender<SessionState>,
) -> bool {
    match command {
        Command::Pause => {
            *paused = true;
            false
        }
        Command::Resume => {
            *paused = false;
            false
        }
        Command::Reset => {
            *ancestor = Entry::empty_directory();
            false
        }
        Command::Flush(ack) => {
            pending_flush_acks.push(ack);
            false
        }
        Command::Terminate(ack) => {
            cancellation.cancel();
            let _ = alpha.shutdown().await;
            let _ = beta.shutdown().await;
            state_tx.send_modify(|s| s.set(ControllerState::Halted));
            let _ = ack.send(());
            true
        }
    }
}

/// Drains every command currently queued without blocking. Returns `true`
/// if a `Terminate` was among them (and has already been acted on).
async fn drain_commands(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    paused: &mut bool,
    ancestor: &mut Entry,
    pending_flush_acks: &mut Vec<oneshot::Sender<()>>,
    cancellation: &CancellationToken,
    alpha: &Arc<dyn Endpoint>,
    beta: &Arc<dyn Endpoint>,
    state_tx: &watch::Sender<SessionState>,
) -> bool {
    while let Ok(command) = commands.try_recv() {
        if handle_command(
            command,
            paused,
            ancestor,
            pending_flush_acks,
            cancellation,
            alpha,
            beta,
            state_tx,
        )
        .await
        {
            return true;
        }
    }
    false
}

async fn run(
    session_id: String,
    alpha: Arc<dyn Endpoint>,
    beta: Arc<dyn Endpoint>,
    mut ancestor: Entry,
    config: ResolvedConfiguration,
    start_paused: bool,
    ancestor_sink: Arc<dyn AncestorSink>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<SessionState>,
) {
    let cancellation = CancellationToken::new();
    let mut backoff = Backoff::default();
    let mut paused = start_paused;
    let mut pending_flush_acks: Vec<oneshot::Sender<()>> = Vec::new();

    'outer: loop {
        if drain_commands(
            &mut commands,
            &mut paused,
            &mut ancestor,
            &mut pending_flush_acks,
            &cancellation,
            &alpha,
            &beta,
            &state_tx,
        )
        .await
        {
            return;
        }

        if paused {
            state_tx.send_modify(|s| s.set(ControllerState::Paused));
            for ack in pending_flush_acks.drain(..) {
                let _ = ack.send(());
            }
            match commands.recv().await {
                Some(command) => {
                    if handle_command(
                        command,
                        &mut paused,
                        &mut ancestor,
                        &mut pending_flush_acks,
                        &cancellation,
                        &alpha,
                        &beta,
                        &state_tx,
                    )
                    .await
                    {
                        return;
                    }
                }
                None => return,
            }
            continue;
        }

        state_tx.send_modify(|s| s.set(ControllerState::Connecting));
        state_tx.send_modify(|s| s.set(ControllerState::Scanning));

        let (alpha_scan, beta_scan) = tokio::join!(
            alpha.scan(None, &cancellation),
            beta.scan(None, &cancellation)
        );
        let scan_outcome = match (alpha_scan, beta_scan) {
            (Ok(a), Ok(b)) => Ok((a, b)),
            (Err(error), _) | (_, Err(error)) => Err(error),
        };

        let (alpha_report, beta_report) = match scan_outcome {
            Ok(pair) => pair,
            Err(error) => match cycle::classify(&error) {
                ErrorClass::Cancelled => continue,
                ErrorClass::Fatal => {
                    let _ = alpha.shutdown().await;
                    let _ = beta.shutdown().await;
                    state_tx.send_modify(|s| {
                        s.last_error = Some(error.to_string());
                        s.set(ControllerState::Halted);
                    });
                    return;
                }
                ErrorClass::Transient => {
                    tracing::warn!(session_id, %error, "scan failed; disconnecting with backoff");
                    state_tx.send_modify(|s| s.set(ControllerState::Disconnected));
                    let delay = backoff.advance();
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        command = commands.recv() => {
                            match command {
                                Some(command) => {
                                    if handle_command(command, &mut paused, &mut ancestor, &mut pending_flush_acks, &cancellation, &alpha, &beta, &state_tx).await {
                                        return;
                                    }
                                }
                                None => return,
                            }
                        }
                    }
                    continue;
                }
            },
        };

        state_tx.send_modify(|s| s.set(ControllerState::Reconciling));
        let outcome = reconcile::reconcile(
            &ancestor,
            &alpha_report.snapshot,
            &beta_report.snapshot,
            config.synchronization_mode,
            config.alpha_wins_on_conflict,
        );

        state_tx.send_modify(|s| s.set(ControllerState::StagingAlpha));
        let alpha_transition = match cycle::stage_changes(&beta, &alpha, &outcome.alpha_changes, &cancellation).await {
            Ok(()) => {
                state_tx.send_modify(|s| s.set(ControllerState::TransitioningAlpha));
                match alpha.transition(outcome.alpha_changes.clone(), &cancellation).await {
                    Ok(report) => report,
                    Err(error) => {
                        if matches!(cycle::classify(&error), ErrorClass::Fatal) {
                            let _ = alpha.shutdown().await;
                            let _ = beta.shutdown().await;
                            state_tx.send_modify(|s| {
                                s.last_error = Some(error.to_string());
                                s.set(ControllerState::Halted);
                            });
                            return;
                        }
                        tracing::warn!(session_id, %error, "alpha transition failed");
                        state_tx.send_modify(|s| s.set(ControllerState::Disconnected));
                        continue;
                    }
                }
            }
            Err(error) => {
                if matches!(cycle::classify(&error), ErrorClass::Fatal) {
                    let _ = alpha.shutdown().await;
                    let _ = beta.shutdown().await;
                    state_tx.send_modify(|s| {
                        s.last_error = Some(error.to_string());
                        s.set(ControllerState::Halted);
                    });
                    return;
                }
                tracing::warn!(session_id, %error, "staging alpha failed");
                state_tx.send_modify(|s| s.set(ControllerState::Disconnected));
                continue;
            }
        };

        state_tx.send_modify(|s| s.set(ControllerState::StagingBeta));
        let beta_transition = match cycle::stage_changes(&alpha, &beta, &outcome.beta_changes, &cancellation).await {
            Ok(()) => {
                state_tx.send_modify(|s| s.set(ControllerState::TransitioningBeta));
                match beta.transition(outcome.beta_changes.clone(), &cancellation).await {
                    Ok(report) => report,
                    Err(error) => {
                        if matches!(cycle::classify(&error), ErrorClass::Fatal) {
                            let _ = alpha.shutdown().await;
                            let _ = beta.shutdown().await;
                            state_tx.send_modify(|s| {
                                s.last_error = Some(error.to_string());
                                s.set(ControllerState::Halted);
                            });
                            return;
                        }
                        tracing::warn!(session_id, %error, "beta transition failed");
                        state_tx.send_modify(|s| s.set(ControllerState::Disconnected));
                        continue;
                    }
                }
            }
            Err(error) => {
                if matches!(cycle::classify(&error), ErrorClass::Fatal) {
                    let _ = alpha.shutdown().await;
                    let _ = beta.shutdown().await;
                    state_tx.send_modify(|s| {
                        s.last_error = Some(error.to_string());
                        s.set(ControllerState::Halted);
                    });
                    return;
                }
                tracing::warn!(session_id, %error, "staging beta failed");
                state_tx.send_modify(|s| s.set(ControllerState::Disconnected));
                continue;
            }
        };

        state_tx.send_modify(|s| s.set(ControllerState::Saving));

        let alpha_final = cycle::apply_changes(
            alpha_report.snapshot.clone(),
            &outcome.alpha_changes,
            &alpha_transition.applied,
        );
        let beta_final = cycle::apply_changes(
            beta_report.snapshot.clone(),
            &outcome.beta_changes,
            &beta_transition.applied,
        );
        ancestor = cycle::merge_ancestor(Some(&ancestor), Some(&alpha_final), Some(&beta_final))
            .unwrap_or_else(Entry::empty_directory);

        if let Err(error) = ancestor_sink.save_ancestor(&session_id, &ancestor).await {
            tracing::warn!(session_id, %error, "failed to persist ancestor");
        }

        backoff.reset();
        state_tx.send_modify(|s| {
            s.last_error = None;
            s.conflicts = outcome.conflicts;
            s.alpha_scan_problems = cycle::count_problematic(&alpha_report.snapshot);
            s.beta_scan_problems = cycle::count_problematic(&beta_report.snapshot);
            s.alpha_transition_problems = alpha_transition.problems.into_iter().map(Into::into).collect();
            s.beta_transition_problems = beta_transition.problems.into_iter().map(Into::into).collect();
            s.successful_cycles += 1;
        });
        for ack in pending_flush_acks.drain(..) {
            let _ = ack.send(());
        }

        state_tx.send_modify(|s| s.set(ControllerState::Watching));
        if drain_commands(
            &mut commands,
            &mut paused,
            &mut ancestor,
            &mut pending_flush_acks,
            &cancellation,
            &alpha,
            &beta,
            &state_tx,
        )
        .await
        {
            return;
        }
        if paused || !pending_flush_acks.is_empty() {
            continue;
        }

        tokio::select! {
            biased;
            command = commands.recv() => {
                match command {
                    Some(command) => {
                        if handle_command(command, &mut paused, &mut ancestor, &mut pending_flush_acks, &cancellation, &alpha, &beta, &state_tx).await {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = alpha.poll(&cancellation) => {}
            _ = beta.poll(&cancellation) => {}
        }
    }
}
