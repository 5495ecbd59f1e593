use gibberish_detector::TurnDetectorConfig;
use gibberish_drivers::{ModelId, SettingsSnapshot};
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("playback_rate must be within [0.5, 2.0], got {0}")]
    PlaybackRateOutOfRange(String),
    #[error("language tag must not be empty")]
    EmptyLanguage,
}

/// The full configuration surface for one session (§9): every knob named in
/// §4.1 and §4.2, explicitly enumerated rather than left as free-floating
/// config globals. Constructed through `with_*` builder methods; unknown
/// fields are rejected by construction since there is no open map to
/// populate them into.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    model_id: ModelId,
    voice_id: Option<String>,
    playback_rate: f32,
    language: String,
    temperature: Option<f32>,

    silence_timeout_ms: u32,
    text_growth_threshold: u32,
    ignore_volatile_after_silence: bool,
    min_turn_chars: u32,
    min_interrupt_chars: u32,

    phase1_ms: u32,
    phase2_ms: u32,
    phase3_ms: u32,
    llm_hard_timeout_ms: u32,
    interrupt_grace_ms: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_id: ModelId::default(),
            voice_id: None,
            playback_rate: 1.0,
            language: "en-US".to_string(),
            temperature: None,

            silence_timeout_ms: 500,
            text_growth_threshold: 2,
            ignore_volatile_after_silence: true,
            min_turn_chars: 1,
            min_interrupt_chars: 1,

            phase1_ms: 500,
            phase2_ms: 1_500,
            phase3_ms: 2_000,
            llm_hard_timeout_ms: 15_000,
            interrupt_grace_ms: 250,
        }
    }
}

impl Settings {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn with_model_id(mut self, model_id: ModelId) -> Self {
        self.model_id = model_id;
        self
    }

    pub fn with_voice_id(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = Some(voice_id.into());
        self
    }

    pub fn with_playback_rate(mut self, rate: f32) -> Self {
        self.playback_rate = rate;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_silence_timeout_ms(mut self, ms: u32) -> Self {
        self.silence_timeout_ms = ms;
        self
    }

    pub fn with_text_growth_threshold(mut self, threshold: u32) -> Self {
        self.text_growth_threshold = threshold;
        self
    }

    pub fn with_phase_deadlines_ms(mut self, phase1: u32, phase2: u32, phase3: u32) -> Self {
        self.phase1_ms = phase1;
        self.phase2_ms = phase2;
        self.phase3_ms = phase3;
        self
    }

    pub fn with_llm_hard_timeout_ms(mut self, ms: u32) -> Self {
        self.llm_hard_timeout_ms = ms;
        self
    }

    pub fn with_interrupt_grace_ms(mut self, ms: u32) -> Self {
        self.interrupt_grace_ms = ms;
        self
    }

    /// Validates cross-field constraints not expressible in the type system
    /// alone (§9: "playback_rate: float [0.5, 2.0]").
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(0.5..=2.0).contains(&self.playback_rate) {
            return Err(SettingsError::PlaybackRateOutOfRange(
                self.playback_rate.to_string(),
            ));
        }
        if self.language.trim().is_empty() {
            return Err(SettingsError::EmptyLanguage);
        }
        Ok(())
    }

    pub fn min_interrupt_chars(&self) -> u32 {
        self.min_interrupt_chars
    }

    pub fn phase1(&self) -> Duration {
        Duration::from_millis(self.phase1_ms as u64)
    }

    pub fn phase2(&self) -> Duration {
        Duration::from_millis(self.phase2_ms as u64)
    }

    pub fn phase3(&self) -> Duration {
        Duration::from_millis(self.phase3_ms as u64)
    }

    pub fn llm_hard_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_hard_timeout_ms as u64)
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms as u64)
    }

    /// Derives the Turn Detector's narrower configuration view.
    pub fn to_detector_config(&self) -> TurnDetectorConfig {
        TurnDetectorConfig {
            silence_timeout: Duration::from_millis(self.silence_timeout_ms as u64),
            text_growth_threshold: self.text_growth_threshold,
            ignore_volatile_after_silence: self.ignore_volatile_after_silence,
            min_turn_chars: self.min_turn_chars,
        }
    }

    /// Derives the snapshot handed to driver requests. Snapshotted once at
    /// Phase1 entry; later settings changes do not retroactively affect an
    /// in-flight generation (§6, §9).
    pub fn to_driver_snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            model_id: self.model_id,
            voice_id: self.voice_id.clone(),
            playback_rate: self.playback_rate,
            language: self.language.clone(),
            temperature: self.temperature,
        }
    }
}
