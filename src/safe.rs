//! Never-failing speech helpers
//!
//! For call sites that only care whether speech completed, was cancelled,
//! or failed, and that share the audio output with pre-rendered clips.

use crate::engine::{SpeakOptions, SpeechEngine};
use crate::error::{SpeechError, SpeechResult};
use async_trait::async_trait;
use tracing::debug;

/// Coarse result of a speak call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    Completed,
    Cancelled,
    Error,
}

impl SpeakOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakOutcome::Completed => "completed",
            SpeakOutcome::Cancelled => "cancelled",
            SpeakOutcome::Error => "error",
        }
    }
}

impl std::fmt::Display for SpeakOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SpeechResult<()>> for SpeakOutcome {
    fn from(result: &SpeechResult<()>) -> Self {
        match result {
            Ok(()) => SpeakOutcome::Completed,
            Err(SpeechError::Cancelled) => SpeakOutcome::Cancelled,
            Err(_) => SpeakOutcome::Error,
        }
    }
}

/// Speak without ever returning an error
pub async fn safe_speak(engine: &SpeechEngine, text: &str, options: SpeakOptions) -> SpeakOutcome {
    let result = engine.speak(text, options).await;
    if let Err(e) = &result {
        debug!("safe_speak swallowed: {}", e);
    }
    SpeakOutcome::from(&result)
}

/// Player for pre-rendered audio clips sharing the speech output device
#[async_trait]
pub trait AudioPlayback: Send + Sync {
    /// Play the clip at `url`; resolves when playback ends
    async fn play(&self, url: &str, rate: f32) -> SpeechResult<()>;

    fn pause(&self);

    fn resume(&self);

    fn cancel(&self);

    /// Cancel every active player, not just this one
    fn cancel_all(&self);
}

/// Silence every pre-rendered clip, then speak.
///
/// Both drive the same audio output, so overlapping them is audible.
pub async fn speak_exclusive(
    players: &dyn AudioPlayback,
    engine: &SpeechEngine,
    text: &str,
    options: SpeakOptions,
) -> SpeakOutcome {
    players.cancel_all();
    safe_speak(engine, text, options).await
}
