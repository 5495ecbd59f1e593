//! The lifetime object tying together a single speculative LLM+TTS effort.
//!
//! A `GenerationHandle` is created when the cascade scheduler begins Phase 1
//! for a committed turn and lives until either playback ends normally or an
//! interruption cancels it. Its cancellation flag is a
//! `tokio_util::sync::CancellationToken` rather than a hand-rolled atomic:
//! the same token is handed to the LLM and TTS drivers as part of their
//! request types, so "cancel the handle" and "signal the drivers to stop"
//! are the same operation.

use gibberish_drivers::{LlmResult, TtsResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifies a generation handle within a session. Monotonically
/// increasing so the Event Router can discard any driver result whose id
/// does not match the session's current handle (the stale-event guard).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Issues strictly increasing `HandleId`s for one session. Sessions each own
/// their own generator; ids are never compared across sessions.
#[derive(Debug, Default)]
pub struct HandleIdGenerator(AtomicU64);

impl HandleIdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> HandleId {
        HandleId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Status of the playback leg of a generation. Distinct from the full
/// `PlaybackControl` trait object (owned by the cascade scheduler while
/// playback is live) so the handle can report "where are we" without
/// holding a `Box<dyn PlaybackControl>` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    NotStarted,
    Started,
    Stopped,
}

/// One of the three slots a generation writes into as its drivers complete.
pub enum Artifact {
    Llm(LlmResult),
    Tts(TtsResult),
    Playback(PlaybackState),
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    #[error("generation handle was already cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, HandleError>;

#[derive(Default)]
struct Artifacts {
    llm_result: Option<LlmResult>,
    tts_result: Option<TtsResult>,
    playback_state: Option<PlaybackState>,
}

/// Represents a single in-flight LLM+TTS effort. Owned by exactly one
/// session at a time; a session swaps its current handle out (via
/// `gibberish_session::Session::swap_handle`) rather than mutating this one
/// in place once a new turn commits.
pub struct GenerationHandle {
    id: HandleId,
    turn_id: Uuid,
    cancellation_token: CancellationToken,
    artifacts: Mutex<Artifacts>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl GenerationHandle {
    pub fn new(id: HandleId, turn_id: Uuid) -> Self {
        Self {
            id,
            turn_id,
            cancellation_token: CancellationToken::new(),
            artifacts: Mutex::new(Artifacts::default()),
            created_at: chrono::Utc::now(),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    /// The token to embed in driver requests (`LlmRequest::cancellation_token`,
    /// `TtsDriver::prepare`'s token argument). Cloning is cheap; the clone
    /// observes cancellation issued through `cancel()`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Idempotent. Cancelling an already-cancelled handle is a no-op beyond
    /// the first call (§8 round-trip property).
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Writes into the matching artifact slot. Fails without writing if the
    /// handle has already been cancelled — cached artifacts must never
    /// become readable after cancellation (§3 invariant).
    pub fn store(&self, artifact: Artifact) -> Result<()> {
        if self.is_cancelled() {
            return Err(HandleError::Cancelled);
        }
        let mut artifacts = self.artifacts.lock().unwrap();
        match artifact {
            Artifact::Llm(r) => artifacts.llm_result = Some(r),
            Artifact::Tts(r) => artifacts.tts_result = Some(r),
            Artifact::Playback(s) => artifacts.playback_state = Some(s),
        }
        Ok(())
    }

    /// Reads the LLM artifact if present and the handle is still live.
    /// Returns `None` once cancelled, even if a slot was populated before
    /// cancellation — cached artifacts become unreadable on cancel (§3).
    pub fn llm_result(&self) -> Option<LlmResult> {
        if self.is_cancelled() {
            return None;
        }
        self.artifacts.lock().unwrap().llm_result.clone()
    }

    pub fn tts_result(&self) -> Option<TtsResult> {
        if self.is_cancelled() {
            return None;
        }
        self.artifacts.lock().unwrap().tts_result.clone()
    }

    pub fn playback_state(&self) -> Option<PlaybackState> {
        if self.is_cancelled() {
            return None;
        }
        self.artifacts.lock().unwrap().playback_state
    }

    /// Clears every slot. Called by the Interruption Arbiter as step 5 of
    /// the cancel protocol; harmless to call again.
    pub fn discard_artifacts(&self) {
        let mut artifacts = self.artifacts.lock().unwrap();
        artifacts.llm_result = None;
        artifacts.tts_result = None;
        artifacts.playback_state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_result(text: &str) -> LlmResult {
        LlmResult {
            text: text.to_string(),
            metadata: None,
        }
    }

    #[test]
    fn handle_ids_are_strictly_increasing() {
        let gen = HandleIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert!(a.as_u64() < b.as_u64());
    }

    #[test]
    fn cancel_is_idempotent() {
        let handle = GenerationHandle::new(HandleId(0), Uuid::new_v4());
        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn store_fails_after_cancellation() {
        let handle = GenerationHandle::new(HandleId(0), Uuid::new_v4());
        handle.cancel();
        let err = handle.store(Artifact::Llm(llm_result("hi"))).unwrap_err();
        assert_eq!(err, HandleError::Cancelled);
    }

    #[test]
    fn cached_artifacts_become_unreadable_after_cancel() {
        let handle = GenerationHandle::new(HandleId(0), Uuid::new_v4());
        handle.store(Artifact::Llm(llm_result("hi"))).unwrap();
        assert_eq!(handle.llm_result(), Some(llm_result("hi")));

        handle.cancel();
        assert_eq!(handle.llm_result(), None);
    }

    #[test]
    fn discard_artifacts_clears_all_slots() {
        let handle = GenerationHandle::new(HandleId(0), Uuid::new_v4());
        handle.store(Artifact::Llm(llm_result("hi"))).unwrap();
        handle.discard_artifacts();
        assert_eq!(handle.llm_result(), None);
    }

    #[test]
    fn cancellation_token_reflects_cancel() {
        let handle = GenerationHandle::new(HandleId(0), Uuid::new_v4());
        let token = handle.cancellation_token();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }
}
