//! The per-session actor: one `tokio::spawn`ed task owning a `Session`,
//! racing the cascade scheduler's future against inbound driver events the
//! same way a `select!` races a worker future against a shutdown signal
//! elsewhere in the corpus.
//!
//! This is the "single-session cooperative actor" of §5: every mutation of
//! `Session`/`TurnDetector`/`CascadeScheduler`/arbiter state for one session
//! happens on this one task. Driver events arrive over a bounded
//! `tokio::mpsc` inbox (mirroring the corpus's `AudioBusSender`/`Receiver`
//! split); outbound timeline events are drained from the session's own
//! queue and fanned out to a `tokio::broadcast` channel plus the
//! conversation store.

use crate::runtime::VtpRuntime;
use gibberish_arbiter::{cancel, CancelCause};
use gibberish_cascade::CascadeOutcome;
use gibberish_detector::TranscriptionUpdate;
use gibberish_drivers::SettingsSnapshot;
use gibberish_events::{PhaseState, TimelineEvent, TIMELINE_TOPIC};
use gibberish_handle::{GenerationHandle, HandleId};
use gibberish_router::{DriverEvent, EventRouter, RoutedOutcome};
use gibberish_session::{Session, TimelineEnvelope, TurnDecision};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Capacity of one session's inbound driver-event channel. Generous enough
/// that a burst of volatile transcription updates never forces the
/// transcription source to block on `send`.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Capacity of the outbound broadcast channel fanned out to presentation
/// subscribers. Lagging subscribers drop the oldest events rather than
/// stalling the session actor (`tokio::sync::broadcast`'s own policy).
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// What arrives at the session actor. `Shutdown` is orchestration-only and
/// deliberately kept out of [`DriverEvent`] — the router crate has no
/// business knowing about process lifecycle.
#[derive(Debug)]
pub enum ActorMessage {
    Driver(DriverEvent),
    Shutdown,
}

/// A running session actor: the inbox to feed it driver events, a
/// subscription point for outbound timeline events, and the two background
/// tasks (control loop, outbound forwarder) backing it.
pub struct SessionHandle {
    session: Arc<Session>,
    inbox: mpsc::Sender<ActorMessage>,
    outbound: broadcast::Sender<TimelineEnvelope>,
    control: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl SessionHandle {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn id(&self) -> Uuid {
        self.session.id()
    }

    /// Feeds one inbound driver event to the actor. Backpressures the
    /// caller if the inbox is full rather than dropping silently.
    pub async fn send(&self, event: DriverEvent) -> Result<(), mpsc::error::SendError<()>> {
        self.inbox
            .send(ActorMessage::Driver(event))
            .await
            .map_err(|_| mpsc::error::SendError(()))
    }

    /// A fresh view of outbound timeline events, from this point forward.
    pub fn subscribe(&self) -> broadcast::Receiver<TimelineEnvelope> {
        self.outbound.subscribe()
    }

    /// Requests an orderly shutdown (§5: "cancelling the current handle and
    /// draining outbound events") and waits for the control loop to exit.
    pub async fn shutdown(self) {
        let _ = self.inbox.send(ActorMessage::Shutdown).await;
        let _ = self.control.await;
        self.forwarder.abort();
    }
}

/// Spawns the control loop and outbound forwarder for `session` on the
/// shared `runtime`.
pub fn spawn(runtime: Arc<VtpRuntime>, session: Arc<Session>) -> SessionHandle {
    let (inbox_tx, inbox_rx) = mpsc::channel(DEFAULT_INBOX_CAPACITY);
    let (outbound_tx, _) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);

    let forwarder = tokio::spawn(forward_outbound(
        session.clone(),
        runtime.clone(),
        outbound_tx.clone(),
    ));
    let control = tokio::spawn(run_control_loop(session.clone(), runtime, inbox_rx));

    SessionHandle {
        session,
        inbox: inbox_tx,
        outbound: outbound_tx,
        control,
        forwarder,
    }
}

/// Drains the session's outbound queue forever, appending the two
/// timeline-visible events to the conversation store (§6), fanning every
/// event out to the `EventBus` under [`TIMELINE_TOPIC`] for hosts that bridge
/// through a topic/JSON interface, and re-publishing everything to the
/// broadcast channel for typed presentation-layer subscribers.
async fn forward_outbound(
    session: Arc<Session>,
    runtime: Arc<VtpRuntime>,
    outbound_tx: broadcast::Sender<TimelineEnvelope>,
) {
    loop {
        let envelope = session.recv_outbound().await;
        if matches!(
            envelope.event,
            TimelineEvent::UserTurnVisible { .. } | TimelineEvent::AssistantResponseVisible { .. }
        ) {
            runtime
                .conversation_store
                .append(envelope.session_id, envelope.event.clone())
                .await;
        }
        match serde_json::to_value(&envelope) {
            Ok(payload) => runtime.event_bus.emit(TIMELINE_TOPIC, payload),
            Err(error) => tracing::warn!(%error, "failed to serialize outbound event for the event bus"),
        }
        // No subscribers is the common case in tests; a send error there is
        // not a fault.
        let _ = outbound_tx.send(envelope);
    }
}

/// What interrupted the current phase (or ended it without a timer firing).
enum ActiveSignal {
    /// A volatile update with new speech while a generation was active.
    VolatileInterrupt(TranscriptionUpdate),
    /// A final update committed a *new* turn while a generation was still
    /// active (§4.1 commits regardless of phase) — treated the same as an
    /// interruption, with the freshly committed text carried through to the
    /// next loop iteration instead of being replayed through the detector.
    FinalCommit(String),
    PlaybackEnded,
    Shutdown,
}

fn apply_settings_snapshot(session: &Session, snapshot: SettingsSnapshot) {
    let mut settings = session
        .full_settings()
        .with_model_id(snapshot.model_id)
        .with_playback_rate(snapshot.playback_rate)
        .with_language(snapshot.language.clone());
    if let Some(voice_id) = snapshot.voice_id.clone() {
        settings = settings.with_voice_id(voice_id);
    }
    if let Some(temperature) = snapshot.temperature {
        settings = settings.with_temperature(temperature);
    }
    if let Err(error) = settings.validate() {
        tracing::warn!(%error, "rejecting settings change, keeping prior settings");
        return;
    }
    session.update_settings(settings);
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
    }
}

/// Waits while `Listening`: races the turn detector's silence timer against
/// the next inbound event, applying settings changes inline, until a turn
/// commits or the actor is told to stop.
async fn wait_for_turn_commit(
    session: &Session,
    inbox: &mut mpsc::Receiver<ActorMessage>,
) -> Option<String> {
    loop {
        let deadline = session.detector_deadline();
        tokio::select! {
            biased;
            msg = inbox.recv() => {
                match msg {
                    None | Some(ActorMessage::Shutdown) => return None,
                    Some(ActorMessage::Driver(event)) => {
                        let current_handle_id = session.current_handle().map(|h| h.id());
                        match EventRouter::new().route(session, current_handle_id, event) {
                            Some(RoutedOutcome::TranscriptionUpdate { seq, text, is_final }) => {
                                let update = TranscriptionUpdate {
                                    seq,
                                    text,
                                    is_final,
                                    recv_ts: Instant::now(),
                                };
                                match session.begin_turn(update) {
                                    TurnDecision::TurnCommitted(turn_text) => return Some(turn_text),
                                    TurnDecision::VolatileText(text) => {
                                        session.publish(TimelineEvent::VolatileText { text });
                                    }
                                    TurnDecision::KeepListening | TurnDecision::Interrupt => {}
                                }
                            }
                            Some(RoutedOutcome::SettingsChanged(snapshot)) => {
                                apply_settings_snapshot(session, snapshot);
                            }
                            _ => {}
                        }
                    }
                }
            }
            _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                if let TurnDecision::TurnCommitted(turn_text) = session.on_silence_timeout(deadline.expect("guarded by is_some")) {
                    return Some(turn_text);
                }
            }
        }
    }
}

/// Waits while a generation is active (any phase but `Listening`): the only
/// signals that matter are a new interruption, a freshly committed turn
/// arriving mid-generation, playback ending (only once `watch_playback_end`
/// is set, i.e. once phase 3 has actually started playback), or shutdown.
async fn next_during_active(
    session: &Session,
    inbox: &mut mpsc::Receiver<ActorMessage>,
    handle_id: HandleId,
    watch_playback_end: bool,
) -> ActiveSignal {
    loop {
        match inbox.recv().await {
            None | Some(ActorMessage::Shutdown) => return ActiveSignal::Shutdown,
            Some(ActorMessage::Driver(event)) => {
                match EventRouter::new().route(session, Some(handle_id), event) {
                    Some(RoutedOutcome::TranscriptionUpdate { seq, text, is_final }) => {
                        let update = TranscriptionUpdate {
                            seq,
                            text,
                            is_final,
                            recv_ts: Instant::now(),
                        };
                        match session.begin_turn(update.clone()) {
                            TurnDecision::Interrupt => return ActiveSignal::VolatileInterrupt(update),
                            TurnDecision::TurnCommitted(text) => return ActiveSignal::FinalCommit(text),
                            _ => {}
                        }
                    }
                    Some(RoutedOutcome::SettingsChanged(snapshot)) => {
                        apply_settings_snapshot(session, snapshot);
                    }
                    Some(RoutedOutcome::PlaybackEnded) if watch_playback_end => {
                        return ActiveSignal::PlaybackEnded;
                    }
                    // LlmReady/LlmFailed/TtsReady/TtsFailed/PlaybackStarted/PlaybackFailed and a
                    // PlaybackEnded seen before phase 3 starts playback are not expected on this
                    // path: `run_turn` drives the LLM/TTS/playback futures directly rather than
                    // over the inbox. A stray one is logged and dropped, not treated as a fault.
                    Some(other) => {
                        tracing::debug!(?other, "ignoring driver event not relevant to the active phase");
                    }
                    None => {}
                }
            }
        }
    }
}

/// The session's whole lifetime: `Idle` → `Listening` → (repeat) `Phase1Running`
/// → `Phase2Running` → `Phase3Playing` → `Listening`, with `Cancelling`
/// interleaved by [`gibberish_arbiter::cancel`] on any interruption.
async fn run_control_loop(
    session: Arc<Session>,
    runtime: Arc<VtpRuntime>,
    mut inbox: mpsc::Receiver<ActorMessage>,
) {
    session.set_phase(PhaseState::Listening);
    let mut pending_text: Option<String> = None;

    'outer: loop {
        let turn_text = match pending_text.take() {
            Some(text) => text,
            None => match wait_for_turn_commit(&session, &mut inbox).await {
                Some(text) => text,
                None => break 'outer,
            },
        };

        let turn_id = Uuid::new_v4();
        let committed_at = Instant::now();
        let handle = Arc::new(GenerationHandle::new(session.next_handle_id(), turn_id));
        session.swap_handle(Some(handle.clone()));
        let grace = session.full_settings().interrupt_grace();

        let run_fut = runtime
            .cascade
            .run_turn(&session, &handle, turn_text, committed_at, grace);
        tokio::pin!(run_fut);

        enum Outcome {
            Completed(gibberish_cascade::CascadeOutput),
            Signal(ActiveSignal),
        }

        // Races phases 1-2 (and the start of phase 3) against interruption.
        // Dropping `run_fut` here when the signal branch wins is the entire
        // cancellation mechanism the cascade crate relies on (see its doc
        // comment): no cached artifact can be written, no response can be
        // published, once this select has resolved in the signal's favor.
        let result = tokio::select! {
            biased;
            out = &mut run_fut => Outcome::Completed(out),
            sig = next_during_active(&session, &mut inbox, handle.id(), false) => Outcome::Signal(sig),
        };

        let cascade_output = match result {
            Outcome::Completed(out) => out,
            Outcome::Signal(ActiveSignal::Shutdown) => {
                cancel(&session, &handle, None, CancelCause::SessionShutdown, grace).await;
                session.swap_handle(None);
                break 'outer;
            }
            Outcome::Signal(ActiveSignal::VolatileInterrupt(update)) => {
                cancel(&session, &handle, None, CancelCause::UserInterruption, grace).await;
                session.swap_handle(None);
                if let TurnDecision::VolatileText(text) = session.begin_turn(update) {
                    session.publish(TimelineEvent::VolatileText { text });
                }
                continue 'outer;
            }
            Outcome::Signal(ActiveSignal::FinalCommit(text)) => {
                cancel(&session, &handle, None, CancelCause::UserInterruption, grace).await;
                session.swap_handle(None);
                pending_text = Some(text);
                continue 'outer;
            }
            Outcome::Signal(ActiveSignal::PlaybackEnded) => {
                unreachable!("playback end is never watched before phase 3 starts playback")
            }
        };

        match cascade_output.outcome {
            CascadeOutcome::LlmFailed(_) | CascadeOutcome::LlmTimedOut => {
                session.swap_handle(None);
            }
            CascadeOutcome::Completed {
                started_playback: false,
            } => {
                session.swap_handle(None);
            }
            CascadeOutcome::Completed {
                started_playback: true,
            } => {
                let playback = cascade_output
                    .playback
                    .expect("started_playback implies a playback control");
                loop {
                    match next_during_active(&session, &mut inbox, handle.id(), true).await {
                        ActiveSignal::PlaybackEnded => {
                            session.set_phase(PhaseState::Listening);
                            session.swap_handle(None);
                            break;
                        }
                        ActiveSignal::Shutdown => {
                            cancel(
                                &session,
                                &handle,
                                Some(playback.as_ref()),
                                CancelCause::SessionShutdown,
                                grace,
                            )
                            .await;
                            session.swap_handle(None);
                            break 'outer;
                        }
                        ActiveSignal::VolatileInterrupt(update) => {
                            cancel(
                                &session,
                                &handle,
                                Some(playback.as_ref()),
                                CancelCause::UserInterruption,
                                grace,
                            )
                            .await;
                            session.swap_handle(None);
                            if let TurnDecision::VolatileText(text) = session.begin_turn(update) {
                                session.publish(TimelineEvent::VolatileText { text });
                            }
                            break;
                        }
                        ActiveSignal::FinalCommit(text) => {
                            cancel(
                                &session,
                                &handle,
                                Some(playback.as_ref()),
                                CancelCause::UserInterruption,
                                grace,
                            )
                            .await;
                            session.swap_handle(None);
                            pending_text = Some(text);
                            break;
                        }
                    }
                }
            }
        }
    }

    tracing::info!(session_id = %session.id(), "session actor exiting");
}
