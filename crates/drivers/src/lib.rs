//! Trait boundaries for the named external collaborators the voice turn
//! pipeline talks to: the LLM client, the TTS/playback driver, and the
//! conversation store. None of these are implemented here — this crate only
//! specifies the contract, plus in-memory test doubles, the same way the
//! corpus separates a domain trait (`TranscriptRepository`) from whatever
//! infrastructure crate implements it.

mod conversation_store;
mod llm;
mod playback;
mod settings;
mod tts;

pub use conversation_store::{ConversationStore, NullConversationStore, RecordingConversationStore};
pub use llm::{LlmDriver, LlmError, LlmRequest, LlmResult};
pub use playback::{PlaybackControl, PlaybackDriver, PlaybackError, PreparedAudio};
pub use settings::{ModelId, SettingsSnapshot};
pub use tts::{AudioHandle, TtsDriver, TtsError, TtsResult};
