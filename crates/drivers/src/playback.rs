use crate::tts::{AudioHandle, TtsResult};
use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PlaybackError {
    #[error("playback device error: {0}")]
    DeviceError(String),
    #[error("playback cancelled")]
    Cancelled,
}

/// A handle to an in-flight playback that can be told to stop.
///
/// The spec targets stopping within 100ms of `stop()` being called; this
/// trait does not itself enforce that bound — it is a property of the
/// concrete driver, verified by the host application's own tests.
#[async_trait]
pub trait PlaybackControl: Send + Sync {
    async fn stop(&self);
    fn is_stopped(&self) -> bool;
}

/// The audio output collaborator. Exclusive: the scheduler only holds it
/// during Phase3Playing (see the session-wide playback permit in the
/// orchestration crate).
#[async_trait]
pub trait PlaybackDriver: Send + Sync {
    /// Begin playback. For a `TtsResult::Synchronous` driver, text is
    /// rendered and played in one step; for `TtsResult::Prepared`, the
    /// prepared audio handle is played back.
    async fn play(
        &self,
        tts_result: &TtsResult,
        text: &str,
    ) -> Result<Box<dyn PlaybackControl>, PlaybackError>;
}

/// Convenience alias used by callers that already hold a prepared handle and
/// want to name it without re-importing `tts::AudioHandle`.
pub type PreparedAudio = AudioHandle;
