//! Civic Speech Library
//!
//! Speech-synthesis orchestration for the civics study app: turns text into
//! spoken audio reliably on top of speech backends that stop mid-utterance,
//! double-fire or never fire completion, and report cancellation as errors.

pub mod config;
pub mod engine;
pub mod error;
pub mod quirks;
pub mod safe;
pub mod text;
pub mod tts;
pub mod voices;

pub use engine::{
    DefaultsPatch, EngineDefaults, EngineStatus, SpeakOptions, SpeechEngine, SpeechState,
    Subscription,
};
pub use error::{SpeechError, SpeechResult};
pub use safe::{safe_speak, speak_exclusive, AudioPlayback, SpeakOutcome};
pub use text::{chunk_for_speech, estimate_duration};
pub use tts::{SpeechBackend, Utterance, UtteranceEvent};
pub use voices::{find_voice, Voice, VoiceCatalog, VoicePreferences};
