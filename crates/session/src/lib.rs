//! Owns per-session mutable state: settings, the active generation handle,
//! the turn detector's tracking window, the current pipeline phase, and the
//! outbound timeline queue (§3, §4.4).
//!
//! State-mutating operations are serialized behind internal locks rather
//! than a message-passing actor; §5 allows either shape, and a lock keeps
//! this crate usable without pulling in an actor runtime of its own. The
//! top-level orchestration crate wraps one `Session` per actor task.

mod outbound;
mod settings;

pub use gibberish_events::TimelineEnvelope;
pub use outbound::OutboundQueue;
pub use settings::{Settings, SettingsError};

use gibberish_detector::{DetectorEvent, TranscriptionUpdate, TurnDetector};
use gibberish_events::{PhaseState, TimelineEvent};
use gibberish_handle::{GenerationHandle, HandleId, HandleIdGenerator};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use uuid::Uuid;

/// Default capacity of the bounded outbound timeline queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// The decision `Session::begin_turn` hands back to the caller, combining
/// the Turn Detector's output with the Interruption Arbiter's detection
/// rule (§4.3, §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnDecision {
    KeepListening,
    VolatileText(String),
    TurnCommitted(String),
    Interrupt,
}

pub struct Session {
    id: Uuid,
    settings: RwLock<Settings>,
    detector: Mutex<TurnDetector>,
    current_handle: Mutex<Option<Arc<GenerationHandle>>>,
    handle_ids: HandleIdGenerator,
    phase: Mutex<PhaseState>,
    outbound: OutboundQueue,
}

impl Session {
    pub fn new(id: Uuid, settings: Settings) -> Self {
        let detector = TurnDetector::new(settings.to_detector_config());
        Self {
            id,
            settings: RwLock::new(settings),
            detector: Mutex::new(detector),
            current_handle: Mutex::new(None),
            handle_ids: HandleIdGenerator::new(),
            phase: Mutex::new(PhaseState::Idle),
            outbound: OutboundQueue::new(DEFAULT_OUTBOUND_CAPACITY),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings_snapshot(&self) -> gibberish_drivers::SettingsSnapshot {
        self.settings.read().unwrap().to_driver_snapshot()
    }

    pub fn full_settings(&self) -> Settings {
        self.settings.read().unwrap().clone()
    }

    /// Mid-generation changes never retroactively affect an in-flight
    /// handle (§6, §9) — only the *next* Phase1 entry observes them.
    pub fn update_settings(&self, settings: Settings) {
        *self.settings.write().unwrap() = settings;
    }

    pub fn phase(&self) -> PhaseState {
        *self.phase.lock().unwrap()
    }

    /// Transitions phase and emits the corresponding diagnostic timeline
    /// event in one step, so the two can never drift apart.
    pub fn set_phase(&self, phase: PhaseState) -> u64 {
        *self.phase.lock().unwrap() = phase;
        self.publish(TimelineEvent::PhaseChanged { phase })
    }

    /// Feeds one transcription update through the Turn Detector, folding in
    /// the Interruption Arbiter's detection rule: a non-empty volatile
    /// update while any phase other than Listening is active is an
    /// interrupt candidate and is not fed to the detector — the caller
    /// (the arbiter) is expected to call [`Self::reset_detector`] and
    /// replay the update once the session is back in `Listening`.
    pub fn begin_turn(&self, update: TranscriptionUpdate) -> TurnDecision {
        let phase = self.phase();
        let min_interrupt_chars = self.settings.read().unwrap().min_interrupt_chars();

        let is_interrupt_candidate = !update.is_final
            && !update.text.is_empty()
            && update.text.chars().count() >= min_interrupt_chars as usize
            && phase.has_active_generation();

        if is_interrupt_candidate {
            return TurnDecision::Interrupt;
        }

        let event = self.detector.lock().unwrap().on_update(update);
        match event {
            DetectorEvent::TurnCommitted(text) => TurnDecision::TurnCommitted(text),
            DetectorEvent::Volatile(text) => TurnDecision::VolatileText(text),
            DetectorEvent::Ignored => TurnDecision::KeepListening,
        }
    }

    /// The instant the caller should sleep until for the silence timer, if
    /// one is armed.
    pub fn detector_deadline(&self) -> Option<Instant> {
        self.detector.lock().unwrap().deadline()
    }

    /// Call when a sleep scheduled against [`Self::detector_deadline`]
    /// completes.
    pub fn on_silence_timeout(&self, fired_deadline: Instant) -> TurnDecision {
        match self
            .detector
            .lock()
            .unwrap()
            .on_silence_timeout(fired_deadline)
        {
            Some(text) => TurnDecision::TurnCommitted(text),
            None => TurnDecision::KeepListening,
        }
    }

    /// Replaces the turn detector with a fresh one, discarding its
    /// in-progress watermark/timer. Cancel protocol step 6 (§4.3): "Reset
    /// the Turn Detector's watermark so the new utterance is tracked as
    /// fresh."
    pub fn reset_detector(&self) {
        let config = self.settings.read().unwrap().to_detector_config();
        *self.detector.lock().unwrap() = TurnDetector::new(config);
    }

    pub fn next_handle_id(&self) -> HandleId {
        self.handle_ids.next()
    }

    pub fn current_handle(&self) -> Option<Arc<GenerationHandle>> {
        self.current_handle.lock().unwrap().clone()
    }

    /// Atomically installs `new`, returning the handle it replaced. A
    /// session owns at most one handle at a time (§3 invariant); callers
    /// are responsible for cancelling the returned handle if it was still
    /// live.
    pub fn swap_handle(&self, new: Option<Arc<GenerationHandle>>) -> Option<Arc<GenerationHandle>> {
        std::mem::replace(&mut self.current_handle.lock().unwrap(), new)
    }

    pub fn publish(&self, event: TimelineEvent) -> u64 {
        self.outbound.publish(self.id, event)
    }

    pub async fn recv_outbound(&self) -> TimelineEnvelope {
        self.outbound.recv().await
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }
}
