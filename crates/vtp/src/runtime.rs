//! Process-wide wiring shared by every session actor: the three named
//! drivers, the conversation store, and the cascade scheduler built on top
//! of them.

use crate::queue::QueuedPlaybackDriver;
use gibberish_cascade::CascadeScheduler;
use gibberish_drivers::{ConversationStore, LlmDriver, PlaybackDriver, TtsDriver};
use gibberish_events::{EventBusRef, NullEventBus};
use std::sync::Arc;

/// Everything a session actor (see `crate::actor::spawn`) needs that is
/// *not* per-session: the driver collaborators, the conversation store, the
/// playback-queue-wrapped scheduler built from them, and the `EventBus` used
/// to fan outbound timeline events out to a presentation layer that expects
/// the corpus's topic/JSON-payload shape rather than a typed broadcast
/// channel (e.g. the teacher's Tauri event bridge). One `VtpRuntime` is
/// shared (via `Arc`) across every session actor in the process, the same
/// way the corpus shares one engine registry across recorder sessions.
pub struct VtpRuntime {
    pub(crate) cascade: CascadeScheduler,
    pub(crate) conversation_store: Arc<dyn ConversationStore>,
    pub(crate) event_bus: EventBusRef,
}

impl VtpRuntime {
    /// Builds a runtime with a `NullEventBus` — use [`Self::with_event_bus`]
    /// to also fan outbound events out over a topic-based bus (e.g. to bridge
    /// into a host application's own event system).
    pub fn new(
        llm: Arc<dyn LlmDriver>,
        tts: Arc<dyn TtsDriver>,
        playback: Arc<dyn PlaybackDriver>,
        conversation_store: Arc<dyn ConversationStore>,
    ) -> Arc<Self> {
        Self::with_event_bus(llm, tts, playback, conversation_store, Arc::new(NullEventBus))
    }

    pub fn with_event_bus(
        llm: Arc<dyn LlmDriver>,
        tts: Arc<dyn TtsDriver>,
        playback: Arc<dyn PlaybackDriver>,
        conversation_store: Arc<dyn ConversationStore>,
        event_bus: EventBusRef,
    ) -> Arc<Self> {
        let queued_playback: Arc<dyn PlaybackDriver> = Arc::new(QueuedPlaybackDriver::new(playback));
        Arc::new(Self {
            cascade: CascadeScheduler::new(llm, tts, queued_playback),
            conversation_store,
            event_bus,
        })
    }
}
