//! Outbound timeline contracts for the voice turn pipeline.
//!
//! This crate defines the DTOs that flow out of a session towards the
//! presentation layer, and the `EventBus` trait that decouples emission
//! from any concrete transport (a window, a socket, a test harness).

mod bus;
mod phase;

pub use bus::{EmittedEvent, EventBus, EventBusRef, InMemoryEventBus, NullEventBus};
pub use phase::PhaseState;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reason a generation was cancelled or an assistant turn failed to land.
///
/// Stable for the enumerated set; marked `non_exhaustive` because additional
/// kinds may be introduced additively without breaking existing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AssistantErrorKind {
    LlmTimeout,
    LlmProviderError,
    LlmInvalidSettings,
    PlaybackDeviceError,
    InternalInvariantViolation,
}

impl std::fmt::Display for AssistantErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LlmTimeout => "llm_timeout",
            Self::LlmProviderError => "llm_provider_error",
            Self::LlmInvalidSettings => "llm_invalid_settings",
            Self::PlaybackDeviceError => "playback_device_error",
            Self::InternalInvariantViolation => "internal_invariant_violation",
        };
        f.write_str(s)
    }
}

/// Outbound event emitted to the presentation layer.
///
/// Producers: the Event Router, on behalf of the Cascade Scheduler and
/// Interruption Arbiter.
/// Consumers: the UI (out of scope here) and the conversation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEvent {
    /// The user's own committed turn. Published before any LLM work completes.
    UserTurnVisible {
        turn_id: Uuid,
        text: String,
        ts_ms: i64,
    },
    /// Live, possibly-superseded transcription text for display only.
    VolatileText { text: String },
    /// The assistant's response, published at phase3 once artifacts are ready.
    AssistantResponseVisible {
        turn_id: Uuid,
        text: String,
        ts_ms: i64,
    },
    /// A driver error downgraded or surfaced to the timeline.
    AssistantErrorVisible {
        turn_id: Uuid,
        kind: AssistantErrorKind,
        detail: Option<String>,
    },
    /// The generation for `turn_id` was cancelled; any partial display must be removed.
    InterruptionOccurred { turn_id: Uuid },
    /// Diagnostic signal, not part of the conversation itself.
    PhaseChanged { phase: PhaseState },
}

impl TimelineEvent {
    /// The turn this event is about, if any (`PhaseChanged`/`VolatileText` have none).
    pub fn turn_id(&self) -> Option<Uuid> {
        match self {
            Self::UserTurnVisible { turn_id, .. }
            | Self::AssistantResponseVisible { turn_id, .. }
            | Self::AssistantErrorVisible { turn_id, .. }
            | Self::InterruptionOccurred { turn_id } => Some(*turn_id),
            Self::VolatileText { .. } | Self::PhaseChanged { .. } => None,
        }
    }
}

/// A `TimelineEvent` stamped with the session and sequence number it was
/// published under. Sequence numbers are strictly increasing per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEnvelope {
    pub session_id: Uuid,
    pub seq: u64,
    pub event: TimelineEvent,
}

/// Event topic used when publishing a `TimelineEnvelope` through an `EventBus`.
pub const TIMELINE_TOPIC: &str = "vtp:timeline";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_turn_visible_round_trips() {
        let event = TimelineEvent::UserTurnVisible {
            turn_id: Uuid::nil(),
            text: "hello there".to_string(),
            ts_ms: 650,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"user_turn_visible\""));
        let back: TimelineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn turn_id_extraction() {
        let e = TimelineEvent::InterruptionOccurred {
            turn_id: Uuid::nil(),
        };
        assert_eq!(e.turn_id(), Some(Uuid::nil()));
        assert_eq!(
            TimelineEvent::VolatileText { text: String::new() }.turn_id(),
            None
        );
    }

    #[test]
    fn error_kind_display_matches_taxonomy_strings() {
        assert_eq!(AssistantErrorKind::LlmTimeout.to_string(), "llm_timeout");
        assert_eq!(
            AssistantErrorKind::LlmProviderError.to_string(),
            "llm_provider_error"
        );
    }
}
