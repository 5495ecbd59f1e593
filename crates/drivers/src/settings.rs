use serde::{Deserialize, Serialize};

/// Active model identifier. Unknown values are rejected at the settings
/// boundary rather than threaded through as a free-form string (§9: "dynamic
/// typed session settings" become an explicitly enumerated struct).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ModelId {
    Default,
    Fast,
    Reasoning,
}

impl Default for ModelId {
    fn default() -> Self {
        Self::Default
    }
}

/// The subset of session settings a driver call needs, snapshotted once at
/// Phase1 entry and carried on the generation handle for the rest of its
/// life. Mid-generation config changes never affect in-flight work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub model_id: ModelId,
    pub voice_id: Option<String>,
    /// Playback speed multiplier, clamped to `[0.5, 2.0]` by the owning settings struct.
    pub playback_rate: f32,
    /// BCP-47 language tag, e.g. `"en-US"`.
    pub language: String,
    pub temperature: Option<f32>,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            model_id: ModelId::default(),
            voice_id: None,
            playback_rate: 1.0,
            language: "en-US".to_string(),
            temperature: None,
        }
    }
}
