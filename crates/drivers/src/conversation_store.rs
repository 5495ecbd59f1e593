use async_trait::async_trait;
use gibberish_events::TimelineEvent;
use std::sync::Mutex;
use uuid::Uuid;

/// The durable-persistence collaborator. Out of scope as a VTP component
/// (§1, §6): the VTP only calls `append` on `UserTurnVisible` and
/// `AssistantResponseVisible` and never reads the store back. Appends are
/// expected to return immediately; back-pressure is the store's problem.
///
/// Mirrors the corpus's `TranscriptRepository` shape — a narrow domain trait
/// implemented by whatever infrastructure crate the host application wires
/// in (SQLite, a remote API, a file). This crate only ships test doubles.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, session_id: Uuid, event: TimelineEvent);
}

/// Discards everything. Useful for benchmarks or when persistence is handled
/// elsewhere (the host application may point a no-op store in entirely and
/// tap the `EventBus` directly instead).
pub struct NullConversationStore;

#[async_trait]
impl ConversationStore for NullConversationStore {
    async fn append(&self, _session_id: Uuid, _event: TimelineEvent) {}
}

/// Captures every appended event for inspection in tests.
#[derive(Default)]
pub struct RecordingConversationStore {
    entries: Mutex<Vec<(Uuid, TimelineEvent)>>,
}

impl RecordingConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Uuid, TimelineEvent)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl ConversationStore for RecordingConversationStore {
    async fn append(&self, session_id: Uuid, event: TimelineEvent) {
        self.entries.lock().unwrap().push((session_id, event));
    }
}
