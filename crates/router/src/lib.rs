//! Bridges driver events to scheduler-visible outcomes and scheduler
//! outcomes to the outbound timeline (§4.5).
//!
//! The one responsibility that must live here rather than in the cascade
//! scheduler is the stale-event guard: every driver event carries the
//! handle id it was issued against, and any event whose handle id does not
//! match the session's *current* handle is dropped before it can touch the
//! timeline. This is what makes a late LLM result after an interruption a
//! no-op (§8 scenario E) instead of a race.

use gibberish_drivers::{LlmError, LlmResult, PlaybackError, SettingsSnapshot, TtsError, TtsResult};
use gibberish_events::{AssistantErrorKind, TimelineEvent};
use gibberish_handle::HandleId;
use gibberish_session::Session;
use uuid::Uuid;

/// The discriminated inbound event stream named in §4.5. `handle_id` is
/// absent on events that are not scoped to one generation (a fresh
/// transcription update, a settings change from the UI).
#[derive(Debug, Clone)]
pub enum DriverEvent {
    TranscriptionUpdate {
        seq: u64,
        text: String,
        is_final: bool,
    },
    LlmResult {
        handle_id: HandleId,
        turn_id: Uuid,
        result: LlmResult,
    },
    LlmError {
        handle_id: HandleId,
        turn_id: Uuid,
        error: LlmError,
    },
    TtsPrepared {
        handle_id: HandleId,
        result: TtsResult,
    },
    TtsError {
        handle_id: HandleId,
        turn_id: Uuid,
        error: TtsError,
    },
    PlaybackStarted {
        handle_id: HandleId,
    },
    PlaybackEnded {
        handle_id: HandleId,
    },
    PlaybackError {
        handle_id: HandleId,
        turn_id: Uuid,
        error: PlaybackError,
    },
    SettingsChanged(SettingsSnapshot),
}

impl DriverEvent {
    /// `None` for events that are not scoped to any one generation and
    /// therefore bypass the stale-event guard entirely.
    fn handle_id(&self) -> Option<HandleId> {
        match self {
            DriverEvent::LlmResult { handle_id, .. }
            | DriverEvent::LlmError { handle_id, .. }
            | DriverEvent::TtsPrepared { handle_id, .. }
            | DriverEvent::TtsError { handle_id, .. }
            | DriverEvent::PlaybackStarted { handle_id, .. }
            | DriverEvent::PlaybackEnded { handle_id, .. }
            | DriverEvent::PlaybackError { handle_id, .. } => Some(*handle_id),
            DriverEvent::TranscriptionUpdate { .. } | DriverEvent::SettingsChanged(_) => None,
        }
    }
}

/// What the cascade scheduler should do next, once an event survives the
/// stale-event guard and has been translated.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedOutcome {
    LlmReady(LlmResult),
    LlmFailed(AssistantErrorKind),
    TtsReady(TtsResult),
    TtsFailed,
    PlaybackStarted,
    PlaybackEnded,
    PlaybackFailed,
    SettingsChanged(SettingsSnapshot),
    /// Not scoped to a handle; the caller should feed it straight to
    /// `Session::begin_turn`.
    TranscriptionUpdate { seq: u64, text: String, is_final: bool },
}

#[derive(Default)]
pub struct EventRouter;

impl EventRouter {
    pub fn new() -> Self {
        Self
    }

    /// Applies the stale-event guard, then translates. Returns `None` when
    /// the event is dropped (its handle id does not match
    /// `current_handle_id`).
    pub fn route(
        &self,
        session: &Session,
        current_handle_id: Option<HandleId>,
        event: DriverEvent,
    ) -> Option<RoutedOutcome> {
        if let Some(event_handle_id) = event.handle_id() {
            if Some(event_handle_id) != current_handle_id {
                tracing::debug!(
                    event_handle_id = %event_handle_id,
                    current = ?current_handle_id,
                    "dropping stale driver event"
                );
                return None;
            }
        }

        match event {
            DriverEvent::TranscriptionUpdate { seq, text, is_final } => {
                Some(RoutedOutcome::TranscriptionUpdate { seq, text, is_final })
            }
            DriverEvent::LlmResult { result, .. } => Some(RoutedOutcome::LlmReady(result)),
            DriverEvent::LlmError { turn_id, error, .. } => {
                let kind = map_llm_error(&error);
                session.publish(TimelineEvent::AssistantErrorVisible {
                    turn_id,
                    kind,
                    detail: Some(error.to_string()),
                });
                Some(RoutedOutcome::LlmFailed(kind))
            }
            DriverEvent::TtsPrepared { result, .. } => Some(RoutedOutcome::TtsReady(result)),
            DriverEvent::TtsError { .. } => {
                // Downgrade (§7): response text is still published elsewhere;
                // playback is simply skipped.
                Some(RoutedOutcome::TtsFailed)
            }
            DriverEvent::PlaybackStarted { .. } => Some(RoutedOutcome::PlaybackStarted),
            DriverEvent::PlaybackEnded { .. } => Some(RoutedOutcome::PlaybackEnded),
            DriverEvent::PlaybackError { turn_id, error, .. } => {
                session.publish(TimelineEvent::AssistantErrorVisible {
                    turn_id,
                    kind: AssistantErrorKind::PlaybackDeviceError,
                    detail: Some(error.to_string()),
                });
                Some(RoutedOutcome::PlaybackFailed)
            }
            DriverEvent::SettingsChanged(snapshot) => Some(RoutedOutcome::SettingsChanged(snapshot)),
        }
    }
}

fn map_llm_error(error: &LlmError) -> AssistantErrorKind {
    match error {
        LlmError::Timeout => AssistantErrorKind::LlmTimeout,
        LlmError::ProviderError(_) => AssistantErrorKind::LlmProviderError,
        LlmError::InvalidSettings(_) => AssistantErrorKind::LlmInvalidSettings,
        // Cancellation is not an error (§7); a cancelled handle's result
        // never reaches here because the stale-event guard already dropped
        // it, but a driver that surfaces its own cancellation explicitly
        // still needs a mapping to remain exhaustive.
        LlmError::Cancelled => AssistantErrorKind::InternalInvariantViolation,
    }
}
