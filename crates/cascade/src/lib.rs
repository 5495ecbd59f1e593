//! Drives the three-phase speculative LLM/TTS/playback pipeline for one
//! committed turn (§4.2).
//!
//! `run_turn` owns phases 1 through the start of phase 3: it sleeps out each
//! phase deadline, invokes the corresponding driver, and stops short of
//! waiting for natural playback completion — `PlaybackEnded` arrives later,
//! asynchronously, and it is the top-level session actor's job to observe it
//! and return the session to `Listening`.
//!
//! Interruption is handled structurally rather than by polling a flag deep
//! inside this function: the caller races `run_turn`'s future against its
//! inbound event stream in a `select!` and simply drops it when an
//! interruption wins. Dropping an `.await` mid-flight is exactly Rust's
//! built-in cancellation, so no cached artifact can be written and no
//! `AssistantResponseVisible` can be published once the drop has happened —
//! the compiler enforces the invariant for free. The one timeout this
//! function *does* watch for itself is the LLM hard timeout (§4.2), since
//! nothing external is going to notice that for us.

use gibberish_arbiter::{cancel, CancelCause};
use gibberish_drivers::{LlmDriver, LlmRequest, PlaybackControl, PlaybackDriver, TtsDriver};
use gibberish_events::{AssistantErrorKind, PhaseState, TimelineEvent};
use gibberish_handle::{Artifact, GenerationHandle, PlaybackState};
use gibberish_router::{DriverEvent, EventRouter, RoutedOutcome};
use gibberish_session::Session;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How phase 3 concluded, independent of whether audio actually plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOutcome {
    /// The response was published; `started_playback` tells the caller
    /// whether it must now wait for a `PlaybackEnded` event or can return
    /// to `Listening` immediately (TTS/playback downgrades never started
    /// any audio).
    Completed { started_playback: bool },
    LlmFailed(AssistantErrorKind),
    LlmTimedOut,
}

/// The outcome plus, when playback started, the control handle the caller
/// needs to keep around so an interruption can stop it.
pub struct CascadeOutput {
    pub outcome: CascadeOutcome,
    pub playback: Option<Box<dyn PlaybackControl>>,
}

impl std::fmt::Debug for CascadeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeOutput")
            .field("outcome", &self.outcome)
            .field("playback", &self.playback.is_some())
            .finish()
    }
}

impl CascadeOutput {
    fn terminal(outcome: CascadeOutcome) -> Self {
        Self {
            outcome,
            playback: None,
        }
    }
}

/// Owns the three named driver collaborators. One instance is shared (via
/// `Arc`) across every session actor in the process, the same way a single
/// `AudioBusSender`/engine pool is shared across recorder sessions in the
/// corpus.
pub struct CascadeScheduler {
    llm: Arc<dyn LlmDriver>,
    tts: Arc<dyn TtsDriver>,
    playback: Arc<dyn PlaybackDriver>,
}

impl CascadeScheduler {
    pub fn new(
        llm: Arc<dyn LlmDriver>,
        tts: Arc<dyn TtsDriver>,
        playback: Arc<dyn PlaybackDriver>,
    ) -> Self {
        Self { llm, tts, playback }
    }

    /// Runs phases 1–3 for one committed turn. `committed_at` anchors every
    /// phase deadline (§4.2: "measured from TurnCommitted time").
    ///
    /// Cancellation-safety contract: the caller MUST run this inside a
    /// `select!` branch (or otherwise be prepared to drop it) rather than
    /// `tokio::spawn` it and detach — dropping is the only cancellation path
    /// this function relies on. The caller must also have already installed
    /// `handle` as `session`'s current handle via `swap_handle` before
    /// calling in, since the stale-event guard compares driver results
    /// against whatever `session.current_handle()` reports.
    pub async fn run_turn(
        &self,
        session: &Session,
        handle: &Arc<GenerationHandle>,
        turn_text: String,
        committed_at: Instant,
        interrupt_grace: Duration,
    ) -> CascadeOutput {
        let turn_id = handle.turn_id();
        let router = EventRouter::new();
        let settings = session.full_settings();
        let snapshot = session.settings_snapshot();

        session.set_phase(PhaseState::Phase1Running);
        session.publish(TimelineEvent::UserTurnVisible {
            turn_id,
            text: turn_text.clone(),
            ts_ms: chrono::Utc::now().timestamp_millis(),
        });

        tokio::time::sleep_until(tokio::time::Instant::from_std(
            committed_at + settings.phase1(),
        ))
        .await;

        // Phase 1: begin the LLM call. Run it on its own task so it keeps
        // making progress while we sleep out phase2's deadline below.
        let llm_request = LlmRequest {
            turn_text: turn_text.clone(),
            conversation_ref: None,
            settings: snapshot.clone(),
            cancellation_token: handle.cancellation_token(),
        };
        let llm = self.llm.clone();
        let mut llm_task = tokio::spawn(async move { llm.generate(llm_request).await });

        session.set_phase(PhaseState::Phase2Running);
        tokio::time::sleep_until(tokio::time::Instant::from_std(
            committed_at + settings.phase2(),
        ))
        .await;

        let hard_timeout_at = committed_at + settings.llm_hard_timeout();
        let llm_result = tokio::select! {
            joined = &mut llm_task => joined,
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(hard_timeout_at)) => {
                return self
                    .timeout(session, handle, turn_id, interrupt_grace)
                    .await;
            }
        };

        let llm_result = match llm_result {
            Ok(result) => result,
            Err(_join_err) => {
                tracing::warn!(turn_id = %turn_id, "LLM driver task panicked");
                Err(gibberish_drivers::LlmError::ProviderError(
                    "driver task terminated unexpectedly".to_string(),
                ))
            }
        };

        let current_handle_id = session.current_handle().map(|h| h.id());
        let routed = router.route(
            session,
            current_handle_id,
            match &llm_result {
                Ok(result) => DriverEvent::LlmResult {
                    handle_id: handle.id(),
                    turn_id,
                    result: result.clone(),
                },
                Err(error) => DriverEvent::LlmError {
                    handle_id: handle.id(),
                    turn_id,
                    error: error.clone(),
                },
            },
        );

        let llm_result = match routed {
            Some(RoutedOutcome::LlmReady(result)) => result,
            Some(RoutedOutcome::LlmFailed(kind)) => {
                session.set_phase(PhaseState::Listening);
                session.swap_handle(None);
                return CascadeOutput::terminal(CascadeOutcome::LlmFailed(kind));
            }
            _ => unreachable!("router always maps an Llm* driver event to an Llm* outcome"),
        };

        if handle
            .store(Artifact::Llm(llm_result.clone()))
            .is_err()
        {
            // Cancelled between the router call above and here; nothing left
            // to do, the caller's select! will drop us shortly regardless.
            return CascadeOutput::terminal(CascadeOutcome::Completed {
                started_playback: false,
            });
        }

        // Phase 2 proper: TTS preparation, using the same snapshot taken at
        // Phase 1 entry — a settings change must never retroactively affect
        // an in-flight generation (§6, §9).
        let tts = self.tts.clone();
        let tts_text = llm_result.text.clone();
        let token_for_tts = handle.cancellation_token();
        let voice_id = snapshot.voice_id.clone();
        let playback_rate = snapshot.playback_rate;
        let tts_task = tokio::spawn(async move {
            tts.prepare(&tts_text, voice_id.as_deref(), playback_rate, token_for_tts)
                .await
        });

        tokio::time::sleep_until(tokio::time::Instant::from_std(
            committed_at + settings.phase3(),
        ))
        .await;

        let tts_result = match tts_task.await {
            Ok(Ok(result)) => {
                handle.store(Artifact::Tts(result.clone())).ok();
                Some(result)
            }
            Ok(Err(error)) => {
                tracing::info!(turn_id = %turn_id, %error, "TTS preparation failed, downgrading to text-only");
                None
            }
            Err(_join_err) => {
                tracing::warn!(turn_id = %turn_id, "TTS driver task panicked");
                None
            }
        };

        // Phase 3: publish the response and, if we have audio to play,
        // start playback.
        session.publish(TimelineEvent::AssistantResponseVisible {
            turn_id,
            text: llm_result.text.clone(),
            ts_ms: chrono::Utc::now().timestamp_millis(),
        });

        let tts_result = match tts_result {
            Some(result) => result,
            None => {
                session.set_phase(PhaseState::Listening);
                session.swap_handle(None);
                return CascadeOutput::terminal(CascadeOutcome::Completed {
                    started_playback: false,
                });
            }
        };

        match self.playback.play(&tts_result, &llm_result.text).await {
            Ok(control) => {
                handle
                    .store(Artifact::Playback(PlaybackState::Started))
                    .ok();
                session.set_phase(PhaseState::Phase3Playing);
                CascadeOutput {
                    outcome: CascadeOutcome::Completed {
                        started_playback: true,
                    },
                    playback: Some(control),
                }
            }
            Err(error) => {
                session.publish(TimelineEvent::AssistantErrorVisible {
                    turn_id,
                    kind: AssistantErrorKind::PlaybackDeviceError,
                    detail: Some(error.to_string()),
                });
                session.set_phase(PhaseState::Listening);
                session.swap_handle(None);
                CascadeOutput::terminal(CascadeOutcome::Completed {
                    started_playback: false,
                })
            }
        }
    }

    async fn timeout(
        &self,
        session: &Session,
        handle: &Arc<GenerationHandle>,
        turn_id: Uuid,
        interrupt_grace: Duration,
    ) -> CascadeOutput {
        tracing::warn!(turn_id = %turn_id, "LLM hard timeout elapsed");
        session.publish(TimelineEvent::AssistantErrorVisible {
            turn_id,
            kind: AssistantErrorKind::LlmTimeout,
            detail: None,
        });
        cancel(
            session,
            handle,
            None,
            CancelCause::LlmTimeout,
            interrupt_grace,
        )
        .await;
        CascadeOutput::terminal(CascadeOutcome::LlmTimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gibberish_drivers::{LlmError, LlmResult, PlaybackError, TtsError, TtsResult};
    use gibberish_session::Settings;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_util::sync::CancellationToken;

    struct StaticLlm(String);

    #[async_trait]
    impl LlmDriver for StaticLlm {
        async fn generate(&self, _req: LlmRequest) -> Result<LlmResult, LlmError> {
            Ok(LlmResult {
                text: self.0.clone(),
                metadata: None,
            })
        }
    }

    struct FailingLlm(LlmError);

    #[async_trait]
    impl LlmDriver for FailingLlm {
        async fn generate(&self, _req: LlmRequest) -> Result<LlmResult, LlmError> {
            Err(self.0.clone())
        }
    }

    struct NeverRespondsLlm;

    #[async_trait]
    impl LlmDriver for NeverRespondsLlm {
        async fn generate(&self, _req: LlmRequest) -> Result<LlmResult, LlmError> {
            std::future::pending().await
        }
    }

    struct SyncTts;

    #[async_trait]
    impl TtsDriver for SyncTts {
        async fn prepare(
            &self,
            _text: &str,
            _voice_id: Option<&str>,
            _rate: f32,
            _token: CancellationToken,
        ) -> Result<TtsResult, TtsError> {
            Ok(TtsResult::Synchronous)
        }
    }

    struct FailingTts;

    #[async_trait]
    impl TtsDriver for FailingTts {
        async fn prepare(
            &self,
            _text: &str,
            _voice_id: Option<&str>,
            _rate: f32,
            _token: CancellationToken,
        ) -> Result<TtsResult, TtsError> {
            Err(TtsError::SynthFailure("no voices available".to_string()))
        }
    }

    struct RecordingPlayback {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PlaybackControl for RecordingPlayback {
        async fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    struct ScriptedPlayback;

    #[async_trait]
    impl PlaybackDriver for ScriptedPlayback {
        async fn play(
            &self,
            _tts_result: &TtsResult,
            _text: &str,
        ) -> Result<Box<dyn PlaybackControl>, PlaybackError> {
            Ok(Box::new(RecordingPlayback {
                stopped: Arc::new(AtomicBool::new(false)),
            }))
        }
    }

    struct FailingPlayback;

    #[async_trait]
    impl PlaybackDriver for FailingPlayback {
        async fn play(
            &self,
            _tts_result: &TtsResult,
            _text: &str,
        ) -> Result<Box<dyn PlaybackControl>, PlaybackError> {
            Err(PlaybackError::DeviceError("device busy".to_string()))
        }
    }

    fn fast_settings() -> Settings {
        Settings::builder().with_phase_deadlines_ms(1, 2, 3)
    }

    #[tokio::test(start_paused = true)]
    async fn clean_turn_publishes_user_and_assistant_events_and_starts_playback() {
        let session = Session::new(Uuid::new_v4(), fast_settings());
        let handle = Arc::new(GenerationHandle::new(
            session.next_handle_id(),
            Uuid::new_v4(),
        ));
        session.swap_handle(Some(handle.clone()));

        let scheduler = CascadeScheduler::new(
            Arc::new(StaticLlm("hi".to_string())),
            Arc::new(SyncTts),
            Arc::new(ScriptedPlayback),
        );

        let out = scheduler
            .run_turn(
                &session,
                &handle,
                "hello there".to_string(),
                Instant::now(),
                Duration::from_millis(250),
            )
            .await;

        assert_eq!(
            out.outcome,
            CascadeOutcome::Completed {
                started_playback: true
            }
        );
        assert!(out.playback.is_some());
        assert_eq!(session.phase(), gibberish_events::PhaseState::Phase3Playing);

        let user_turn = session.recv_outbound().await;
        assert!(matches!(
            user_turn.event,
            gibberish_events::TimelineEvent::UserTurnVisible { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn llm_provider_error_publishes_assistant_error_and_returns_to_listening() {
        let session = Session::new(Uuid::new_v4(), fast_settings());
        let handle = Arc::new(GenerationHandle::new(
            session.next_handle_id(),
            Uuid::new_v4(),
        ));
        session.swap_handle(Some(handle.clone()));

        let scheduler = CascadeScheduler::new(
            Arc::new(FailingLlm(LlmError::ProviderError("rate limited".to_string()))),
            Arc::new(SyncTts),
            Arc::new(ScriptedPlayback),
        );

        let out = scheduler
            .run_turn(
                &session,
                &handle,
                "hello".to_string(),
                Instant::now(),
                Duration::from_millis(250),
            )
            .await;

        assert_eq!(
            out.outcome,
            CascadeOutcome::LlmFailed(AssistantErrorKind::LlmProviderError)
        );
        assert_eq!(session.phase(), gibberish_events::PhaseState::Listening);
        assert!(session.current_handle().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn tts_failure_downgrades_to_text_only_response() {
        let session = Session::new(Uuid::new_v4(), fast_settings());
        let handle = Arc::new(GenerationHandle::new(
            session.next_handle_id(),
            Uuid::new_v4(),
        ));
        session.swap_handle(Some(handle.clone()));

        let scheduler = CascadeScheduler::new(
            Arc::new(StaticLlm("hi".to_string())),
            Arc::new(FailingTts),
            Arc::new(ScriptedPlayback),
        );

        let out = scheduler
            .run_turn(
                &session,
                &handle,
                "hello".to_string(),
                Instant::now(),
                Duration::from_millis(250),
            )
            .await;

        assert_eq!(
            out.outcome,
            CascadeOutcome::Completed {
                started_playback: false
            }
        );
        assert!(out.playback.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn playback_device_error_still_shows_the_response() {
        let session = Session::new(Uuid::new_v4(), fast_settings());
        let handle = Arc::new(GenerationHandle::new(
            session.next_handle_id(),
            Uuid::new_v4(),
        ));
        session.swap_handle(Some(handle.clone()));

        let scheduler = CascadeScheduler::new(
            Arc::new(StaticLlm("hi".to_string())),
            Arc::new(SyncTts),
            Arc::new(FailingPlayback),
        );

        let out = scheduler
            .run_turn(
                &session,
                &handle,
                "hello".to_string(),
                Instant::now(),
                Duration::from_millis(250),
            )
            .await;

        assert_eq!(
            out.outcome,
            CascadeOutcome::Completed {
                started_playback: false
            }
        );

        let mut saw_response = false;
        let mut saw_error = false;
        for _ in 0..8 {
            let envelope = session.recv_outbound().await;
            match envelope.event {
                gibberish_events::TimelineEvent::AssistantResponseVisible { .. } => {
                    saw_response = true
                }
                gibberish_events::TimelineEvent::AssistantErrorVisible { kind, .. } => {
                    assert_eq!(kind, AssistantErrorKind::PlaybackDeviceError);
                    saw_error = true;
                }
                _ => {}
            }
            if saw_response && saw_error {
                break;
            }
        }
        assert!(saw_response && saw_error);
    }

    #[tokio::test(start_paused = true)]
    async fn llm_hard_timeout_cancels_and_reports_llm_timeout() {
        let session = Session::new(
            Uuid::new_v4(),
            Settings::builder()
                .with_phase_deadlines_ms(1, 2, 3)
                .with_llm_hard_timeout_ms(5),
        );
        let handle = Arc::new(GenerationHandle::new(
            session.next_handle_id(),
            Uuid::new_v4(),
        ));
        session.swap_handle(Some(handle.clone()));

        let scheduler = CascadeScheduler::new(
            Arc::new(NeverRespondsLlm),
            Arc::new(SyncTts),
            Arc::new(ScriptedPlayback),
        );

        let out = scheduler
            .run_turn(
                &session,
                &handle,
                "hello".to_string(),
                Instant::now(),
                Duration::from_millis(10),
            )
            .await;

        assert_eq!(out.outcome, CascadeOutcome::LlmTimedOut);
        assert!(handle.is_cancelled());
        assert_eq!(session.phase(), gibberish_events::PhaseState::Listening);

        let mut saw_timeout = false;
        for _ in 0..8 {
            let envelope = session.recv_outbound().await;
            if let gibberish_events::TimelineEvent::AssistantErrorVisible { kind, .. } =
                envelope.event
            {
                if kind == AssistantErrorKind::LlmTimeout {
                    saw_timeout = true;
                    break;
                }
            }
        }
        assert!(saw_timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_run_turn_mid_flight_leaves_no_cached_artifacts_readable() {
        let session = Session::new(Uuid::new_v4(), fast_settings());
        let handle = Arc::new(GenerationHandle::new(
            session.next_handle_id(),
            Uuid::new_v4(),
        ));
        session.swap_handle(Some(handle.clone()));

        let scheduler = CascadeScheduler::new(
            Arc::new(StaticLlm("hi".to_string())),
            Arc::new(SyncTts),
            Arc::new(ScriptedPlayback),
        );

        let fut = scheduler.run_turn(
            &session,
            &handle,
            "hello".to_string(),
            Instant::now(),
            Duration::from_millis(250),
        );
        tokio::pin!(fut);

        tokio::select! {
            biased;
            _ = tokio::time::sleep(Duration::ZERO) => {}
            _ = &mut fut => panic!("run_turn should not have finished before interruption"),
        }
        drop(fut);
        handle.cancel();

        assert!(handle.llm_result().is_none());
        assert!(handle.tts_result().is_none());
    }
}
