//! Converts a stream of transcription updates into turn-complete decisions.
//!
//! The detector is sans-io: it never sleeps itself. Callers (the session
//! actor) read [`TurnDetector::deadline`] after every [`TurnDetector::on_update`]
//! call and race it against the next inbound update; when the sleep wins,
//! they call [`TurnDetector::on_silence_timeout`] with the deadline they
//! slept on. This keeps the growth/watermark algorithm deterministic and
//! unit-testable under a fake clock (§8's replay-determinism property).

use std::time::{Duration, Instant};

/// One update from the transcription source. `recv_ts` is a monotonic
/// instant, not a wall-clock timestamp — the detector only ever computes
/// durations from it.
#[derive(Debug, Clone)]
pub struct TranscriptionUpdate {
    pub seq: u64,
    pub text: String,
    pub is_final: bool,
    pub recv_ts: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnDetectorConfig {
    pub silence_timeout: Duration,
    pub text_growth_threshold: u32,
    pub ignore_volatile_after_silence: bool,
    pub min_turn_chars: u32,
}

impl Default for TurnDetectorConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_millis(500),
            text_growth_threshold: 2,
            ignore_volatile_after_silence: true,
            min_turn_chars: 1,
        }
    }
}

/// What the detector did in response to one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEvent {
    /// The current best-effort text, not yet committed. Forwarded as-is to
    /// the outbound `VolatileText` timeline event.
    Volatile(String),
    /// A turn is complete; `silence_timer`/watermark state has been reset.
    TurnCommitted(String),
    /// The update was a duplicate, empty-final, below `min_turn_chars`, or
    /// out-of-order and was dropped without changing externally visible
    /// state.
    Ignored,
}

/// A single utterance-tracking window. Reused across utterances within one
/// session; `reset_and_take` returns it to a fresh state after each commit.
pub struct TurnDetector {
    config: TurnDetectorConfig,
    current_text: String,
    watermark_text: Option<String>,
    deadline: Option<Instant>,
    last_seq: Option<u64>,
    malformed_count: u64,
}

impl TurnDetector {
    pub fn new(config: TurnDetectorConfig) -> Self {
        Self {
            config,
            current_text: String::new(),
            watermark_text: None,
            deadline: None,
            last_seq: None,
            malformed_count: 0,
        }
    }

    pub fn config(&self) -> &TurnDetectorConfig {
        &self.config
    }

    /// The instant the caller should sleep until, if any timer is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn current_text(&self) -> &str {
        &self.current_text
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed_count
    }

    /// Feeds one update through the algorithm in the style of a sans-io
    /// state machine: no I/O, no sleeping, pure state transition.
    pub fn on_update(&mut self, update: TranscriptionUpdate) -> DetectorEvent {
        if let Some(last) = self.last_seq {
            if update.seq <= last {
                self.malformed_count += 1;
                tracing::debug!(
                    seq = update.seq,
                    last_seq = last,
                    "dropping out-of-order transcription update"
                );
                return DetectorEvent::Ignored;
            }
        }
        self.last_seq = Some(update.seq);

        if update.is_final {
            return self.on_final(update.text);
        }
        self.on_volatile(update.text, update.recv_ts)
    }

    fn on_final(&mut self, text: String) -> DetectorEvent {
        if text.is_empty() {
            return DetectorEvent::Ignored;
        }
        self.current_text = text;
        if self.current_text.chars().count() >= self.config.min_turn_chars as usize {
            let text = self.reset_and_take();
            tracing::debug!(chars = text.chars().count(), "turn committed on final update");
            DetectorEvent::TurnCommitted(text)
        } else {
            self.reset_and_take();
            DetectorEvent::Ignored
        }
    }

    fn on_volatile(&mut self, text: String, recv_ts: Instant) -> DetectorEvent {
        if text == self.current_text {
            return DetectorEvent::Ignored;
        }
        self.current_text = text;

        let watermark_len = self
            .watermark_text
            .as_ref()
            .map(|w| w.chars().count())
            .unwrap_or(0);
        let growth = self.current_text.chars().count() as i64 - watermark_len as i64;
        let armed = self.watermark_text.is_some();
        let growth_triggers_reset = !armed || growth > self.config.text_growth_threshold as i64;

        // Once we're already past a scheduled silence fire, a late volatile
        // arriving on its heels must not push the window out further —
        // otherwise a user who keeps lightly refining speech could defer
        // commit indefinitely. `ignore_volatile_after_silence` (default true)
        // is exactly this guard; current_text is still updated above so the
        // eventual commit reflects the latest refinement either way.
        let past_silence_threshold = self
            .deadline
            .is_some_and(|deadline| recv_ts >= deadline);
        let suppressed = self.config.ignore_volatile_after_silence && past_silence_threshold;

        if growth_triggers_reset && !suppressed {
            self.watermark_text = Some(self.current_text.clone());
            self.deadline = Some(recv_ts + self.config.silence_timeout);
        }
        DetectorEvent::Volatile(self.current_text.clone())
    }

    /// Called when a previously scheduled sleep-until-deadline completes.
    /// `fired_deadline` is the instant the caller slept on; if a growth
    /// event has since pushed the deadline further out, this fire is stale
    /// and is ignored — the caller should re-read [`Self::deadline`] and
    /// sleep again.
    pub fn on_silence_timeout(&mut self, fired_deadline: Instant) -> Option<String> {
        if self.deadline != Some(fired_deadline) {
            return None;
        }
        if self.current_text.chars().count() < self.config.min_turn_chars as usize {
            self.reset_and_take();
            return None;
        }
        let text = self.reset_and_take();
        tracing::debug!(chars = text.chars().count(), "turn committed on silence timeout");
        Some(text)
    }

    fn reset_and_take(&mut self) -> String {
        self.deadline = None;
        self.watermark_text = None;
        std::mem::take(&mut self.current_text)
    }
}
