//! Process-wide playback exclusivity (§5: "No two sessions may drive
//! playback simultaneously... the default policy is queue").
//!
//! Resolves the §9 open question with a `tokio::sync::Semaphore(1)`: the
//! first session to reach `play()` gets the permit and the device; any
//! other session's `play()` call simply awaits its turn. Tokio's semaphore
//! grants permits FIFO, which gives deterministic ordering across sessions
//! without hand-rolled barge-in logic.

use async_trait::async_trait;
use gibberish_drivers::{PlaybackControl, PlaybackDriver, PlaybackError, TtsResult};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Wraps a concrete [`PlaybackDriver`] so every `play()` call queues behind
/// the shared single-slot semaphore before touching the underlying device.
pub struct QueuedPlaybackDriver {
    inner: Arc<dyn PlaybackDriver>,
    permits: Arc<Semaphore>,
}

impl QueuedPlaybackDriver {
    pub fn new(inner: Arc<dyn PlaybackDriver>) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(1)),
        }
    }
}

#[async_trait]
impl PlaybackDriver for QueuedPlaybackDriver {
    async fn play(
        &self,
        tts_result: &TtsResult,
        text: &str,
    ) -> Result<Box<dyn PlaybackControl>, PlaybackError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("playback semaphore is never closed");
        let control = self.inner.play(tts_result, text).await?;
        Ok(Box::new(QueuedPlaybackControl {
            inner: control,
            permit: Mutex::new(Some(permit)),
        }))
    }
}

/// Releases the device permit as soon as playback stops, whether through an
/// explicit `stop()` or by being dropped once `PlaybackEnded` has been
/// observed. Either path frees the next queued session's `play()` call.
struct QueuedPlaybackControl {
    inner: Box<dyn PlaybackControl>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

#[async_trait]
impl PlaybackControl for QueuedPlaybackControl {
    async fn stop(&self) {
        self.inner.stop().await;
        self.permit.lock().unwrap().take();
    }

    fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}
