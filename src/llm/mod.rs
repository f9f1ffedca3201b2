//! Model backends and candidate fallback.

mod dispatcher;
mod gemini;
mod openai;

pub use dispatcher::{DispatchOutcome, DispatchState, Dispatcher};
pub use gemini::GeminiBackend;
pub use openai::{create_client_with_timeout, OpenAiBackend};

#[cfg(test)]
pub(crate) use dispatcher::tests::ScriptedBackend;

use crate::config::{ModelProvider, ModelSettings};
use crate::content::Attachment;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for model requests (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Why a single candidate attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AttemptError {
    #[error("backend returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("request too large: {0}")]
    PayloadTooLarge(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response contained no text")]
    EmptyResponse,

    #[error("unsupported input: {0}")]
    Unsupported(String),

    #[error("request failed: {0}")]
    Client(String),
}

impl AttemptError {
    /// Whether another candidate could plausibly accept the same request.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::PayloadTooLarge(_))
    }
}

/// One failed candidate attempt, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub model: String,
    pub error: AttemptError,
}

impl std::fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.model, self.error)
    }
}

/// A model answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    /// The backend cut its input to the character budget before sending it.
    pub input_truncated: bool,
}

impl From<String> for Generation {
    fn from(text: String) -> Self {
        Self {
            text,
            input_truncated: false,
        }
    }
}

/// Trait for LLM inference endpoints.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Generate a completion with `model` for `prompt` and an optional attachment.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        attachment: Option<&Attachment>,
    ) -> Result<Generation, AttemptError>;
}

/// Build the backend for the configured provider.
///
/// `max_chars` bounds any text the backend derives itself, such as audio
/// transcripts.
pub fn create_backend(
    settings: &ModelSettings,
    api_key: &str,
    max_chars: usize,
) -> crate::error::Result<Arc<dyn ModelBackend>> {
    let timeout = match settings.timeout_seconds {
        0 => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        secs => Duration::from_secs(secs),
    };

    let backend: Arc<dyn ModelBackend> = match settings.provider {
        ModelProvider::Gemini => Arc::new(GeminiBackend::new(
            api_key,
            settings.base_url.as_deref(),
            timeout,
        )?),
        ModelProvider::OpenAI => Arc::new(OpenAiBackend::new(
            api_key,
            settings.base_url.as_deref(),
            settings.transcription_model.as_deref(),
            timeout,
        )?
        .with_max_chars(max_chars)),
    };

    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_payload_too_large_is_final() {
        assert!(!AttemptError::PayloadTooLarge("413".into()).is_retryable());
        assert!(AttemptError::Rejected { status: 429, body: "quota".into() }.is_retryable());
        assert!(AttemptError::EmptyResponse.is_retryable());
    }

    #[test]
    fn test_create_backend_for_each_provider() {
        let mut settings = ModelSettings::default();
        assert_eq!(create_backend(&settings, "key", 30_000).unwrap().name(), "gemini");

        settings.provider = ModelProvider::OpenAI;
        assert_eq!(create_backend(&settings, "key", 30_000).unwrap().name(), "openai");
    }
}
