//! Civic Speech Error Types
//!
//! One error type for the whole speech stack. Callers mostly care about
//! three outcomes: the backend is missing, speech was cancelled, or speech
//! genuinely failed.

use thiserror::Error;

/// Central error type for speech orchestration
#[derive(Error, Debug)]
pub enum SpeechError {
    /// No usable speech backend, or the engine has been destroyed.
    #[error("Speech synthesis is not supported: {0}")]
    Unsupported(String),

    /// Speech was superseded or explicitly cancelled.
    #[error("Speech was cancelled")]
    Cancelled,

    /// The backend failed, and failed again on retry.
    #[error("Speech synthesis error: {0}")]
    Synthesis(String),

    #[error("Speech backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SpeechError {
    /// True for the "user moved on" outcome, as opposed to a real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SpeechError::Cancelled)
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, SpeechError::Unsupported(_))
    }
}

impl From<zbus::Error> for SpeechError {
    fn from(err: zbus::Error) -> Self {
        SpeechError::Backend(err.to_string())
    }
}

/// Result type alias for speech operations
pub type SpeechResult<T> = Result<T, SpeechError>;
