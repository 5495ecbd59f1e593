use crate::settings::SettingsSnapshot;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything an LLM call needs, independent of transport.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub turn_text: String,
    /// Opaque reference to prior conversation context; the VTP does not
    /// interpret it, only threads it through to the driver.
    pub conversation_ref: Option<Uuid>,
    pub settings: SettingsSnapshot,
    pub cancellation_token: CancellationToken,
}

/// An opaque LLM response. The scheduler never inspects `text` or `metadata`
/// beyond handing `text` to the TTS driver.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResult {
    pub text: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum LlmError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("generation timed out")]
    Timeout,
    #[error("generation cancelled")]
    Cancelled,
}

/// The LLM client collaborator (out of scope as a component; this is its
/// interface boundary). Implementors MUST honor `request.cancellation_token`
/// on a best-effort basis — the scheduler discards the result either way
/// once the token is cancelled.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResult, LlmError>;
}
