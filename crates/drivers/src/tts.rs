use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Opaque handle to synthesized audio, meaningful only to the TTS/playback
/// driver pair that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioHandle(pub String);

/// Result of TTS preparation.
///
/// `Synchronous` is the "null marker" from §3: some drivers render audio at
/// play time with no separate prepare step, in which case phase2 completes
/// instantly and phase3 still waits on its own deadline.
#[derive(Debug, Clone, PartialEq)]
pub enum TtsResult {
    Prepared(AudioHandle),
    Synchronous,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum TtsError {
    #[error("unsupported voice: {0}")]
    UnsupportedVoice(String),
    #[error("audio device busy")]
    AudioDeviceBusy,
    #[error("preparation cancelled")]
    Cancelled,
    #[error("synthesis failed: {0}")]
    SynthFailure(String),
}

/// The TTS collaborator's interface boundary. `tts_unavailable` is a
/// downgrade, not a hard error: the Event Router still publishes the
/// response text and simply skips playback.
#[async_trait]
pub trait TtsDriver: Send + Sync {
    async fn prepare(
        &self,
        text: &str,
        voice_id: Option<&str>,
        rate: f32,
        cancellation_token: CancellationToken,
    ) -> Result<TtsResult, TtsError>;
}
