//! Error types for Cram.

use crate::llm::AttemptRecord;
use thiserror::Error;

/// Library-level error type for Cram operations.
#[derive(Error, Debug)]
pub enum CramError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No API key configured for {0}. Pass --api-key or set the provider's environment variable.")]
    MissingCredential(String),

    #[error("Not a recognizable video link or ID: {0}")]
    InvalidReference(String),

    #[error("Audio acquisition failed: {0}")]
    AcquisitionBlocked(String),

    #[error("Document contains no extractable text (it may be a scanned or image-only PDF)")]
    ExtractionEmpty,

    #[error("Document could not be read: {0}")]
    ExtractionCorrupt(String),

    #[error("All model backends rejected this request ({} attempted)", .attempts.len())]
    BackendExhausted { attempts: Vec<AttemptRecord> },

    #[error("Request is too large for the model backend ({model}): {detail}")]
    PayloadTooLarge { model: String, detail: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CramError {
    /// Whether the error was caused by the material the user supplied,
    /// as opposed to the backends or the local environment.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CramError::InvalidReference(_)
                | CramError::InvalidInput(_)
                | CramError::ExtractionEmpty
                | CramError::ExtractionCorrupt(_)
        )
    }
}

/// Result type alias for Cram operations.
pub type Result<T> = std::result::Result<T, CramError>;
