//! Detects that the user has begun a new utterance while a generation is
//! active, and drives the cancel protocol atomically (§4.3).
//!
//! The detection rule itself lives in `gibberish_session::Session::begin_turn`
//! (it only needs the current phase and the inbound update); this crate owns
//! the cancel *protocol* — the ordered sequence of steps that must run once
//! an interrupt (or an LLM timeout, or a session shutdown) has been decided.

use gibberish_drivers::PlaybackControl;
use gibberish_events::{PhaseState, TimelineEvent};
use gibberish_handle::GenerationHandle;
use gibberish_session::Session;
use std::time::Duration;

/// Why a generation is being cancelled. Never changes the cancel mechanics
/// (§4.3 expansion note) — purely for diagnostics and the emitted
/// `AssistantErrorVisible` kind when the cause is a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    UserInterruption,
    LlmTimeout,
    SessionShutdown,
}

/// Runs the eight-step cancel protocol. `playback` is `None` when no
/// playback was active yet (e.g. an interruption during Phase1Running).
pub async fn cancel(
    session: &Session,
    handle: &GenerationHandle,
    playback: Option<&dyn PlaybackControl>,
    cause: CancelCause,
    interrupt_grace: Duration,
) {
    let turn_id = handle.turn_id();
    tracing::info!(turn_id = %turn_id, ?cause, "cancelling generation handle");

    // Step 1.
    session.set_phase(PhaseState::Cancelling);
    // Step 2.
    handle.cancel();

    // Step 3 (LLM abort) is implicit: the handle's cancellation token is
    // embedded in every in-flight `LlmRequest`; the driver observes it on
    // its own schedule.

    // Step 4.
    if let Some(playback) = playback {
        match tokio::time::timeout(interrupt_grace, playback.stop()).await {
            Ok(()) => {}
            Err(_) => {
                tracing::warn!(
                    turn_id = %turn_id,
                    "playback did not acknowledge stop within the grace period"
                );
            }
        }
    }

    // Step 5.
    handle.discard_artifacts();
    // Step 6.
    session.reset_detector();

    // Step 7: drivers have acknowledged (or we already waited out the grace
    // period above) — return to Listening.
    session.set_phase(PhaseState::Listening);

    // Step 8.
    if matches!(cause, CancelCause::UserInterruption | CancelCause::LlmTimeout) {
        session.publish(TimelineEvent::InterruptionOccurred { turn_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gibberish_session::Settings;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    struct RecordingPlayback {
        stopped: AtomicBool,
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

    #[tokio::test]
    async fn cancel_stops_playback_and_returns_to_listening() {
        let session = Session::new(Uuid::new_v4(), Settings::builder());
        session.set_phase(PhaseState::Phase3Playing);
        let handle = GenerationHandle::new(session.next_handle_id(), Uuid::new_v4());
        let playback = RecordingPlayback {
            stopped: AtomicBool::new(false),
        };

        cancel(
            &session,
            &handle,
            Some(&playback),
            CancelCause::UserInterruption,
            Duration::from_millis(250),
        )
        .await;

        assert!(playback.is_stopped());
        assert!(handle.is_cancelled());
        assert_eq!(session.phase(), PhaseState::Listening);
    }

    #[tokio::test]
    async fn cancel_emits_interruption_occurred_for_user_interruption() {
        let session = Session::new(Uuid::new_v4(), Settings::builder());
        let handle = GenerationHandle::new(session.next_handle_id(), Uuid::new_v4());
        let turn_id = handle.turn_id();

        cancel(
            &session,
            &handle,
            None,
            CancelCause::UserInterruption,
            Duration::from_millis(250),
        )
        .await;

        // Drain the PhaseChanged diagnostics emitted along the way to reach
        // the InterruptionOccurred event.
        let mut seen = false;
        for _ in 0..8 {
            let envelope = session.recv_outbound().await;
            if envelope.event == (TimelineEvent::InterruptionOccurred { turn_id }) {
                seen = true;
                break;
            }
        }
        assert!(seen, "expected an InterruptionOccurred event for the cancelled turn");
    }

    #[tokio::test]
    async fn session_shutdown_does_not_emit_interruption_occurred() {
        let session = Session::new(Uuid::new_v4(), Settings::builder());
        let handle = GenerationHandle::new(session.next_handle_id(), Uuid::new_v4());

        cancel(
            &session,
            &handle,
            None,
            CancelCause::SessionShutdown,
            Duration::from_millis(250),
        )
        .await;

        assert_eq!(session.outbound_len(), 2); // two PhaseChanged events only
    }

    #[tokio::test]
    async fn slow_playback_does_not_block_past_the_grace_period() {
        struct NeverStops;

        #[async_trait]
        impl PlaybackControl for NeverStops {
            async fn stop(&self) {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }

            fn is_stopped(&self) -> bool {
                false
            }
        }

        let session = Session::new(Uuid::new_v4(), Settings::builder());
        let handle = GenerationHandle::new(session.next_handle_id(), Uuid::new_v4());

        let start = tokio::time::Instant::now();
        cancel(
            &session,
            &handle,
            Some(&NeverStops),
            CancelCause::UserInterruption,
            Duration::from_millis(20),
        )
        .await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(session.phase(), PhaseState::Listening);
    }
}
